//! Tile manager errors.

use thiserror::Error;

use crate::cache::StorageError;
use crate::grid::GridError;
use crate::lock::LockError;
use crate::source::SourceError;

use super::DelegateError;

/// Errors raised while loading or creating tiles.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The manager definition is inconsistent; raised at build time.
    #[error("Invalid tile manager configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Grid(#[from] GridError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// A source failed and the error policy is to abort.
    #[error("Source '{name}' failed: {error}")]
    Source {
        name: String,
        #[source]
        error: SourceError,
    },

    #[error("Render delegate failed: {0}")]
    Delegate(#[from] DelegateError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Failed to start tile creators: {0}")]
    Pool(String),
}

impl ManagerError {
    /// Returns `true` if the request may succeed when repeated later.
    pub fn is_retryable(&self) -> bool {
        match self {
            ManagerError::Lock(e) => e.is_retryable(),
            ManagerError::Delegate(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Returns `true` for "nothing to render" geometry results.
    pub fn is_empty_result(&self) -> bool {
        matches!(self, ManagerError::Grid(e) if e.is_empty_result())
    }
}
