//! Image handles passed between sources, the tile manager and storages.
//!
//! An [`ImageSource`] holds an image as encoded bytes, as a decoded RGBA
//! buffer, or both. Each representation is produced on first use and kept,
//! so a tile loaded from storage and served unchanged is never decoded, and
//! a rendered meta-tile is decoded once before splitting.

use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use image::{imageops, DynamicImage, ImageError, Rgba, RgbaImage};

use crate::coord::TileCoord;

/// Encoded image format of a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }

    /// File extension without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
        }
    }

    fn codec(&self) -> image::ImageFormat {
        match self {
            ImageFormat::Png => image::ImageFormat::Png,
            ImageFormat::Jpeg => image::ImageFormat::Jpeg,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mime_type())
    }
}

impl FromStr for ImageFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "png" | "image/png" => Ok(ImageFormat::Png),
            "jpeg" | "jpg" | "image/jpeg" => Ok(ImageFormat::Jpeg),
            other => Err(format!("unsupported image format '{}'", other)),
        }
    }
}

/// A lazily converted image.
#[derive(Clone)]
pub struct ImageSource {
    buffer: Option<Vec<u8>>,
    image: Option<RgbaImage>,
    format: ImageFormat,
    cacheable: bool,
}

impl fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageSource")
            .field("buffer_len", &self.buffer.as_ref().map(Vec::len))
            .field("image_size", &self.image.as_ref().map(|i| i.dimensions()))
            .field("format", &self.format)
            .field("cacheable", &self.cacheable)
            .finish()
    }
}

impl ImageSource {
    /// Wrap encoded image bytes.
    pub fn from_buffer(buffer: Vec<u8>, format: ImageFormat) -> Self {
        Self {
            buffer: Some(buffer),
            image: None,
            format,
            cacheable: true,
        }
    }

    /// Wrap a decoded image; it is encoded as `format` when bytes are needed.
    pub fn from_image(image: RgbaImage, format: ImageFormat) -> Self {
        Self {
            buffer: None,
            image: Some(image),
            format,
            cacheable: true,
        }
    }

    /// A single-color image of `size` pixels.
    pub fn solid(size: (u32, u32), color: [u8; 4], format: ImageFormat) -> Self {
        Self::from_image(
            RgbaImage::from_pixel(size.0, size.1, Rgba(color)),
            format,
        )
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Whether the image may be stored.
    pub fn cacheable(&self) -> bool {
        self.cacheable
    }

    pub fn set_cacheable(&mut self, cacheable: bool) {
        self.cacheable = cacheable;
    }

    pub fn with_cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    /// Encoded bytes, encoding the decoded image on first use.
    pub fn as_buffer(&mut self) -> Result<&[u8], ImageError> {
        if self.buffer.is_none() {
            let image = match &self.image {
                Some(image) => image,
                None => return Ok(&[]),
            };
            self.buffer = Some(encode(image, self.format)?);
        }
        Ok(self.buffer.as_deref().unwrap_or_default())
    }

    /// Decoded image, decoding the bytes on first use.
    pub fn as_image(&mut self) -> Result<&RgbaImage, ImageError> {
        self.ensure_decoded()?;
        match &self.image {
            Some(image) => Ok(image),
            None => Err(empty_image_error()),
        }
    }

    /// Mutable decoded image. Discards the encoded bytes since they no
    /// longer match once the pixels change.
    pub fn image_mut(&mut self) -> Result<&mut RgbaImage, ImageError> {
        self.ensure_decoded()?;
        self.buffer = None;
        self.image.as_mut().ok_or_else(empty_image_error)
    }

    pub fn into_image(mut self) -> Result<RgbaImage, ImageError> {
        self.ensure_decoded()?;
        self.image.take().ok_or_else(empty_image_error)
    }

    /// Re-tag the image as `format`. Bytes encoded in another format are
    /// decoded and dropped, so the next [`Self::as_buffer`] encodes `format`.
    pub fn into_format(mut self, format: ImageFormat) -> Result<Self, ImageError> {
        if self.format != format {
            self.ensure_decoded()?;
            self.buffer = None;
            self.format = format;
        }
        Ok(self)
    }

    /// Pixel dimensions (decodes if needed).
    pub fn size(&mut self) -> Result<(u32, u32), ImageError> {
        Ok(self.as_image()?.dimensions())
    }

    fn ensure_decoded(&mut self) -> Result<(), ImageError> {
        if self.image.is_none() {
            if let Some(buffer) = &self.buffer {
                self.image = Some(image::load_from_memory(buffer)?.to_rgba8());
            }
        }
        Ok(())
    }
}

fn empty_image_error() -> ImageError {
    ImageError::Parameter(image::error::ParameterError::from_kind(
        image::error::ParameterErrorKind::NoMoreData,
    ))
}

fn encode(image: &RgbaImage, format: ImageFormat) -> Result<Vec<u8>, ImageError> {
    let mut out = Cursor::new(Vec::new());
    let dynamic = DynamicImage::ImageRgba8(image.clone());
    match format {
        // JPEG has no alpha channel
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(dynamic.to_rgb8()).write_to(&mut out, format.codec())?,
        ImageFormat::Png => dynamic.write_to(&mut out, format.codec())?,
    }
    Ok(out.into_inner())
}

/// Composite `layers` in order, the first one as the base.
///
/// Returns `None` when there are no layers. The result is in `format`, and
/// cacheable only if every layer is.
pub fn merge_images(
    layers: Vec<ImageSource>,
    format: ImageFormat,
) -> Result<Option<ImageSource>, ImageError> {
    let cacheable = layers.iter().all(ImageSource::cacheable);
    let mut layers = layers.into_iter();
    let base = match layers.next() {
        Some(base) => base,
        None => return Ok(None),
    };
    if layers.len() == 0 {
        return Ok(Some(base.into_format(format)?));
    }

    let mut canvas = base.into_image()?;
    for layer in layers {
        let layer = layer.into_image()?;
        imageops::overlay(&mut canvas, &layer, 0, 0);
    }
    Ok(Some(
        ImageSource::from_image(canvas, format).with_cacheable(cacheable),
    ))
}

/// Cut a rendered meta-tile into tiles.
///
/// `patterns` pairs each tile with the top-left pixel of its area in the
/// meta image. Off-grid entries are skipped. Tile areas that reach past the
/// meta image are left transparent.
pub fn split_meta_image(
    meta: &mut ImageSource,
    tile_size: (u32, u32),
    patterns: &[(Option<TileCoord>, (i64, i64))],
) -> Result<Vec<(TileCoord, ImageSource)>, ImageError> {
    let format = meta.format();
    let cacheable = meta.cacheable();
    let image = meta.as_image()?;

    let mut tiles = Vec::with_capacity(patterns.len());
    for (coord, (ox, oy)) in patterns {
        let Some(coord) = coord else { continue };
        let mut tile = RgbaImage::new(tile_size.0, tile_size.1);
        imageops::replace(&mut tile, image, -ox, -oy);
        tiles.push((
            *coord,
            ImageSource::from_image(tile, format).with_cacheable(cacheable),
        ));
    }
    Ok(tiles)
}
