//! Error types for grid geometry.

use thiserror::Error;

use crate::srs::SrsError;

/// Errors raised by [`TileGrid`](super::TileGrid) and
/// [`MetaGrid`](super::MetaGrid).
///
/// [`GridError::NoTiles`] and [`GridError::InvalidBBox`] mean "nothing to
/// render" rather than a failure; see [`GridError::is_empty_result`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GridError {
    /// The request does not touch the grid, or would need more downscaling
    /// than the grid allows.
    #[error("No tiles for the requested area")]
    NoTiles,

    /// The request bbox collapses to no tiles at the selected level.
    #[error("Invalid BBOX")]
    InvalidBBox,

    /// The level index is outside the resolution pyramid.
    #[error("Invalid resolution level {0}")]
    InvalidLevel(u32),

    /// The grid definition itself is inconsistent.
    #[error("Invalid grid configuration: {0}")]
    Config(String),

    /// The request SRS could not be handled.
    #[error(transparent)]
    Srs(#[from] SrsError),
}

impl GridError {
    /// Returns `true` for the errors that signal an empty result.
    pub fn is_empty_result(&self) -> bool {
        matches!(self, GridError::NoTiles | GridError::InvalidBBox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_result_classification() {
        assert!(GridError::NoTiles.is_empty_result());
        assert!(GridError::InvalidBBox.is_empty_result());
        assert!(!GridError::InvalidLevel(3).is_empty_result());
        assert!(!GridError::Config("x".to_string()).is_empty_result());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            GridError::InvalidLevel(21).to_string(),
            "Invalid resolution level 21"
        );
    }
}
