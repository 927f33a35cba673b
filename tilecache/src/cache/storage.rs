//! Storage backend interface.

use thiserror::Error;

use super::{Tile, TileCollection};

/// Errors raised by storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Backend specific failure.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Persistent tile storage.
///
/// Implementations must tolerate concurrent reads. Writes for one meta-tile
/// are serialized by the tile manager's locker, writes for different
/// meta-tiles may run in parallel.
///
/// Tiles without a coordinate are treated as present: `is_cached` and
/// `load` return `true` and `store` does nothing.
pub trait TileStorage: Send + Sync {
    /// Name of the cache, used as the lock namespace.
    fn identifier(&self) -> &str;

    /// Returns `true` if the tile exists in storage.
    fn is_cached(&self, tile: &Tile) -> Result<bool, StorageError>;

    /// Fill `tile.source` and `tile.timestamp` from storage.
    ///
    /// Returns `false` if the tile does not exist.
    fn load(&self, tile: &mut Tile) -> Result<bool, StorageError>;

    /// Fill `tile.timestamp` without loading the image.
    fn load_metadata(&self, tile: &mut Tile) -> Result<(), StorageError>;

    /// Load every tile of `tiles`; returns `true` if all were found.
    fn load_tiles(&self, tiles: &mut TileCollection) -> Result<bool, StorageError> {
        let mut all = true;
        for tile in tiles.iter_mut() {
            if tile.source.is_none() && !self.load(tile)? {
                all = false;
            }
        }
        Ok(all)
    }

    /// Write `tile` and mark it stored.
    fn store(&self, tile: &mut Tile) -> Result<(), StorageError>;

    fn store_tiles(&self, tiles: &mut [Tile]) -> Result<(), StorageError> {
        for tile in tiles {
            self.store(tile)?;
        }
        Ok(())
    }

    /// Delete the tile; returns `true` if it existed.
    fn remove(&self, tile: &Tile) -> Result<bool, StorageError>;

    /// Location that holds every tile of `level`, for bulk cleanup.
    fn level_location(&self, level: u32) -> String;
}
