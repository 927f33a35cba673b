//! Resolution range and coverage limits for sources.

use crate::coord::BBox;

use super::{ImageSource, MapQuery, Source, SourceError};

/// Where a source is allowed to render.
///
/// `min_res` is the coarsest resolution the source serves and `max_res` the
/// finest; requests coarser than `min_res` or at/finer than `max_res` are
/// answered with [`SourceError::Blank`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SourceLimits {
    pub min_res: Option<f64>,
    pub max_res: Option<f64>,
    pub coverage: Option<BBox>,
}

impl SourceLimits {
    /// Returns `true` if `query` falls inside the limits.
    pub fn contains(&self, query: &MapQuery) -> bool {
        let res = query.bbox.resolution_for(query.size);
        if let Some(min_res) = self.min_res {
            if res > min_res {
                return false;
            }
        }
        if let Some(max_res) = self.max_res {
            if res <= max_res {
                return false;
            }
        }
        match &self.coverage {
            Some(coverage) => coverage.intersects(&query.bbox),
            None => true,
        }
    }
}

/// Decorator that answers out-of-range queries as blank without asking the
/// wrapped source.
pub struct LimitedSource<S> {
    inner: S,
    limits: SourceLimits,
}

impl<S: Source> LimitedSource<S> {
    pub fn new(inner: S, limits: SourceLimits) -> Self {
        Self { inner, limits }
    }

    pub fn limits(&self) -> &SourceLimits {
        &self.limits
    }
}

impl<S: Source> Source for LimitedSource<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn get_map(&self, query: &MapQuery) -> Result<ImageSource, SourceError> {
        if !self.limits.contains(query) {
            tracing::debug!(source = self.name(), bbox = %query.bbox, "Query outside source limits");
            return Err(SourceError::Blank);
        }
        self.inner.get_map(query)
    }

    fn supports_meta_tiles(&self) -> bool {
        self.inner.supports_meta_tiles()
    }
}
