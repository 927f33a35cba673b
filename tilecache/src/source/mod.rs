//! Upstream map sources.
//!
//! A [`Source`] renders an image for a bbox and pixel size. Concrete
//! sources (WMS clients, tile servers, renderers) live outside this crate;
//! the tile manager only depends on this trait.
//!
//! A source that has nothing to draw for a query answers with
//! [`SourceError::Blank`]. Blank layers are skipped when compositing, which
//! is not the same as a failure.

mod image;
mod limited;

pub use self::image::{merge_images, split_meta_image, ImageFormat, ImageSource};
pub use limited::{LimitedSource, SourceLimits};

use std::sync::Arc;

use thiserror::Error;

use crate::coord::BBox;
use crate::srs::Srs;

/// A map request against a source.
#[derive(Debug, Clone)]
pub struct MapQuery {
    pub bbox: BBox,
    pub size: (u32, u32),
    pub srs: Arc<Srs>,
    pub format: ImageFormat,
}

/// Errors returned by sources.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Nothing to draw for this query.
    #[error("Source has no data for the query")]
    Blank,

    /// The upstream request failed.
    #[error("Source request failed: {0}")]
    Failed(String),

    #[error("Image error: {0}")]
    Image(#[from] ::image::ImageError),
}

/// Upstream image source.
///
/// Implementations must be thread-safe: the tile manager queries sources
/// from several creator threads.
pub trait Source: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Render `query`.
    fn get_map(&self, query: &MapQuery) -> Result<ImageSource, SourceError>;

    /// Whether the source accepts meta-tile sized requests.
    fn supports_meta_tiles(&self) -> bool {
        true
    }
}

impl<S: Source + ?Sized> Source for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn get_map(&self, query: &MapQuery) -> Result<ImageSource, SourceError> {
        (**self).get_map(query)
    }

    fn supports_meta_tiles(&self) -> bool {
        (**self).supports_meta_tiles()
    }
}

/// What to do when a source fails during a render.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SourceErrorPolicy {
    /// Fail the whole render with the source error.
    #[default]
    Abort,
    /// Use a solid color layer in place of the failed source.
    Placeholder { color: [u8; 4], cacheable: bool },
}

/// Source that fills every request with a single color.
#[derive(Debug, Clone)]
pub struct SolidSource {
    name: String,
    color: [u8; 4],
}

impl SolidSource {
    pub fn new(name: impl Into<String>, color: [u8; 4]) -> Self {
        Self {
            name: name.into(),
            color,
        }
    }
}

impl Source for SolidSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_map(&self, query: &MapQuery) -> Result<ImageSource, SourceError> {
        Ok(ImageSource::solid(query.size, self.color, query.format))
    }
}
