//! Remote render delegation.
//!
//! Instead of querying sources in-process, a tile manager may hand meta-tile
//! renders to an external render service. The service receives a
//! [`RenderRequest`] and answers with the rendered image; locking, splitting
//! and storing stay in the manager.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coord::{BBox, TileCoord};
use crate::source::ImageSource;

/// Urgency hint passed to the render service.
///
/// Only the two well-known values are defined here. How a service orders
/// requests by priority is up to the service, so no ordering is implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RenderPriority(u8);

impl RenderPriority {
    /// Bulk seeding runs.
    pub const SEED: RenderPriority = RenderPriority(10);
    /// Requests from map clients.
    pub const INTERACTIVE: RenderPriority = RenderPriority(100);

    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Default for RenderPriority {
    fn default() -> Self {
        Self::INTERACTIVE
    }
}

impl fmt::Display for RenderPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A meta-tile render handed to a render service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderRequest {
    /// Grid identity, see [`TileGrid::identity`](crate::grid::TileGrid::identity).
    pub grid: String,
    /// Cache identifier.
    pub cache: String,
    pub bbox: BBox,
    pub size: (u32, u32),
    /// On-grid tiles covered by the render.
    pub tiles: Vec<TileCoord>,
    pub priority: RenderPriority,
}

/// Errors reported by render delegates.
#[derive(Debug, Error)]
pub enum DelegateError {
    /// The service could not be reached.
    #[error("Render service unavailable: {0}")]
    Unavailable(String),

    #[error("Render service did not answer within {0:?}")]
    Timeout(Duration),

    /// The service answered with an error.
    #[error("Render failed: {0}")]
    Failed(String),
}

impl DelegateError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DelegateError::Unavailable(_) | DelegateError::Timeout(_)
        )
    }
}

/// Client of an external render service.
pub trait RenderDelegate: Send + Sync {
    fn render(&self, request: &RenderRequest) -> Result<ImageSource, DelegateError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_values() {
        assert_eq!(RenderPriority::SEED.value(), 10);
        assert_eq!(RenderPriority::INTERACTIVE.value(), 100);
        assert_eq!(RenderPriority::default(), RenderPriority::INTERACTIVE);
    }

    #[test]
    fn test_request_serialization() {
        let request = RenderRequest {
            grid: "GLOBAL_MERCATOR".to_string(),
            cache: "osm".to_string(),
            bbox: BBox::new(0.0, 0.0, 10.0, 10.0),
            size: (512, 512),
            tiles: vec![TileCoord::new(0, 0, 1)],
            priority: RenderPriority::SEED,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["priority"], 10);
        assert_eq!(json["tiles"][0]["z"], 1);
        assert_eq!(json["bbox"]["maxx"], 10.0);

        let back: RenderRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn test_retryable() {
        assert!(DelegateError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!DelegateError::Failed("bad".to_string()).is_retryable());
    }
}
