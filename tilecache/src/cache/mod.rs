//! Tile records and storage backends.
//!
//! [`TileStorage`] is the contract every backend fulfils. Persistent
//! backends (file trees, MBTiles, object stores) implement it outside this
//! crate; [`MemoryTileStorage`] is the in-process implementation.

mod memory;
mod storage;
mod tile;

pub use memory::{MemoryTileStorage, StorageStats, DEFAULT_MEMORY_STORAGE_BYTES};
pub use storage::{StorageError, TileStorage};
pub use tile::{Tile, TileCollection};
