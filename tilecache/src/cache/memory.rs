//! In-memory tile storage with LRU eviction using moka.
//!
//! Entries are weighted by their encoded size, so the storage stays below a
//! byte budget. Useful for tests, short-lived tools and as a front cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use moka::sync::Cache;

use crate::coord::TileCoord;
use crate::source::{ImageFormat, ImageSource};

use super::{StorageError, Tile, TileStorage};

/// Default byte budget for [`MemoryTileStorage`].
pub const DEFAULT_MEMORY_STORAGE_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Debug)]
struct StoredTile {
    data: Vec<u8>,
    format: ImageFormat,
    timestamp: SystemTime,
}

/// Counters of a [`MemoryTileStorage`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub entries: u64,
    pub size_bytes: u64,
}

/// Tile storage held in process memory.
pub struct MemoryTileStorage {
    identifier: String,
    cache: Cache<TileCoord, Arc<StoredTile>>,
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
}

impl MemoryTileStorage {
    /// Create a storage holding at most `max_size_bytes` of encoded tiles.
    ///
    /// # Arguments
    ///
    /// * `identifier` - Cache name, also used as the lock namespace
    /// * `max_size_bytes` - Byte budget before least recently used tiles are evicted
    pub fn new(identifier: impl Into<String>, max_size_bytes: u64) -> Self {
        let cache = Cache::builder()
            .weigher(|_key: &TileCoord, value: &Arc<StoredTile>| -> u32 {
                value.data.len().min(u32::MAX as usize) as u32
            })
            .max_capacity(max_size_bytes)
            .build();

        Self {
            identifier: identifier.into(),
            cache,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stores: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> StorageStats {
        self.cache.run_pending_tasks();
        StorageStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            entries: self.cache.entry_count(),
            size_bytes: self.cache.weighted_size(),
        }
    }

    fn lookup(&self, coord: &TileCoord) -> Option<Arc<StoredTile>> {
        let found = self.cache.get(coord);
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }
}

impl TileStorage for MemoryTileStorage {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn is_cached(&self, tile: &Tile) -> Result<bool, StorageError> {
        match tile.coord {
            None => Ok(true),
            Some(coord) => Ok(tile.source.is_some() || self.cache.contains_key(&coord)),
        }
    }

    fn load(&self, tile: &mut Tile) -> Result<bool, StorageError> {
        let coord = match tile.coord {
            None => return Ok(true),
            Some(coord) => coord,
        };
        if tile.source.is_some() {
            return Ok(true);
        }
        match self.lookup(&coord) {
            Some(stored) => {
                tile.source = Some(ImageSource::from_buffer(stored.data.clone(), stored.format));
                tile.timestamp = Some(stored.timestamp);
                tile.stored = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn load_metadata(&self, tile: &mut Tile) -> Result<(), StorageError> {
        if let Some(stored) = tile.coord.and_then(|c| self.cache.get(&c)) {
            tile.timestamp = Some(stored.timestamp);
        }
        Ok(())
    }

    fn store(&self, tile: &mut Tile) -> Result<(), StorageError> {
        let coord = match tile.coord {
            Some(coord) if !tile.stored => coord,
            _ => return Ok(()),
        };
        let Some(source) = tile.source.as_mut() else {
            return Err(StorageError::Backend(format!("tile {} has no image", coord)));
        };
        let format = source.format();
        let data = source.as_buffer()?.to_vec();
        let timestamp = SystemTime::now();

        self.cache.insert(
            coord,
            Arc::new(StoredTile {
                data,
                format,
                timestamp,
            }),
        );
        self.stores.fetch_add(1, Ordering::Relaxed);
        tile.stored = true;
        tile.timestamp = Some(timestamp);
        Ok(())
    }

    fn remove(&self, tile: &Tile) -> Result<bool, StorageError> {
        Ok(match tile.coord {
            Some(coord) => self.cache.remove(&coord).is_some(),
            None => false,
        })
    }

    fn level_location(&self, level: u32) -> String {
        format!("memory://{}/{:02}", self.identifier, level)
    }
}
