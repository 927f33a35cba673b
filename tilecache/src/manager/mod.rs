//! Tile manager.
//!
//! The [`TileManager`] ties a grid, a storage backend, upstream sources and
//! a locker together. It serves tiles from storage and creates missing or
//! stale ones, batching neighbouring tiles into meta-tiles when the sources
//! allow it.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tilecache::cache::{MemoryTileStorage, TileStorage};
//! use tilecache::coord::TileCoord;
//! use tilecache::grid::TileGrid;
//! use tilecache::manager::TileManager;
//! use tilecache::source::SolidSource;
//!
//! let storage = Arc::new(MemoryTileStorage::new("demo", 16 * 1024 * 1024));
//! let manager = TileManager::builder(Arc::new(TileGrid::global_mercator()), storage)
//!     .source(Arc::new(SolidSource::new("bg", [200, 200, 200, 255])))
//!     .meta_size(2, 2)
//!     .build()
//!     .unwrap();
//!
//! let tiles = manager.load_tiles(&[Some(TileCoord::new(0, 0, 1))]).unwrap();
//! assert!(tiles.all_loaded());
//! assert!(manager.is_cached(Some(TileCoord::new(1, 1, 1))).unwrap());
//! ```

mod creator;
mod delegate;
mod error;
mod filter;

pub use creator::TileCreator;
pub use delegate::{DelegateError, RenderDelegate, RenderPriority, RenderRequest};
pub use error::ManagerError;
pub use filter::{TileFilter, Watermark};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, info};

use crate::cache::{Tile, TileCollection, TileStorage};
use crate::coord::TileCoord;
use crate::grid::{MetaGrid, TileGrid};
use crate::lock::{InProcessLocker, TileLockGuard, TileLocker, DEFAULT_LOCK_TIMEOUT};
use crate::source::{ImageFormat, Source, SourceErrorPolicy};

/// Serves and creates the tiles of one cache.
pub struct TileManager {
    grid: Arc<TileGrid>,
    storage: Arc<dyn TileStorage>,
    sources: Vec<Arc<dyn Source>>,
    format: ImageFormat,
    locker: Arc<dyn TileLocker>,
    meta_grid: Option<MetaGrid>,
    bulk_meta_tiles: bool,
    minimize_meta_requests: bool,
    concurrent_tile_creators: usize,
    expire_timestamp: Option<SystemTime>,
    filters: Vec<Arc<dyn TileFilter>>,
    delegate: Option<Arc<dyn RenderDelegate>>,
    error_policy: SourceErrorPolicy,
}

impl fmt::Debug for TileManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileManager")
            .field("identifier", &self.identifier())
            .field("grid", &self.grid.identity())
            .field("sources", &self.sources.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("format", &self.format)
            .field("meta_grid", &self.meta_grid)
            .field("bulk_meta_tiles", &self.bulk_meta_tiles)
            .field("minimize_meta_requests", &self.minimize_meta_requests)
            .field("concurrent_tile_creators", &self.concurrent_tile_creators)
            .finish()
    }
}

impl TileManager {
    /// Start building a manager for `grid` backed by `storage`.
    pub fn builder(grid: Arc<TileGrid>, storage: Arc<dyn TileStorage>) -> TileManagerBuilder {
        TileManagerBuilder::new(grid, storage)
    }

    /// Cache name of the storage.
    pub fn identifier(&self) -> &str {
        self.storage.identifier()
    }

    pub fn grid(&self) -> &Arc<TileGrid> {
        &self.grid
    }

    pub fn storage(&self) -> &Arc<dyn TileStorage> {
        &self.storage
    }

    pub fn meta_grid(&self) -> Option<&MetaGrid> {
        self.meta_grid.as_ref()
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Whether meta-tiles are fetched tile by tile.
    pub fn bulk_meta_tiles(&self) -> bool {
        self.bulk_meta_tiles
    }

    pub fn expire_timestamp(&self) -> Option<SystemTime> {
        self.expire_timestamp
    }

    /// Returns `true` if the tile is stored and not stale.
    ///
    /// An off-grid position (`None`) is always cached.
    pub fn is_cached(&self, coord: Option<TileCoord>) -> Result<bool, ManagerError> {
        if coord.is_none() {
            return Ok(true);
        }
        let mut tile = Tile::new(coord);
        if !self.storage.is_cached(&tile)? {
            return Ok(false);
        }
        Ok(!self.is_stale(&mut tile)?)
    }

    /// Returns `true` if the tile is stored but older than the expiration
    /// timestamp.
    pub fn is_stale(&self, tile: &mut Tile) -> Result<bool, ManagerError> {
        let Some(expire) = self.expire_timestamp else {
            return Ok(false);
        };
        if tile.is_missing() || !self.storage.is_cached(tile)? {
            return Ok(false);
        }
        if tile.timestamp.is_none() {
            self.storage.load_metadata(tile)?;
        }
        Ok(matches!(tile.timestamp, Some(ts) if ts < expire))
    }

    /// Load a single tile, creating it if needed.
    pub fn load_tile(&self, coord: TileCoord) -> Result<Tile, ManagerError> {
        let tiles = self.load_tiles(&[Some(coord)])?;
        Ok(tiles
            .into_iter()
            .next()
            .unwrap_or_else(|| Tile::new(Some(coord))))
    }

    /// Load tiles for an interactive request, creating missing ones.
    pub fn load_tiles(&self, coords: &[Option<TileCoord>]) -> Result<TileCollection, ManagerError> {
        self.load_tiles_with_priority(coords, RenderPriority::INTERACTIVE)
    }

    /// Load tiles, creating missing and stale ones with `priority`.
    ///
    /// Requested tiles inside the same meta-tile are created by a single
    /// render. Tiles left blank by every source come back without an image.
    pub fn load_tiles_with_priority(
        &self,
        coords: &[Option<TileCoord>],
        priority: RenderPriority,
    ) -> Result<TileCollection, ManagerError> {
        let mut tiles = TileCollection::new(coords.iter().copied());

        let mut uncached = Vec::new();
        for tile in tiles.iter_mut() {
            let Some(coord) = tile.coord else { continue };
            if self.is_stale(tile)? {
                debug!(tile = %coord, "Tile is stale");
                uncached.push(coord);
            } else if !self.storage.load(tile)? {
                uncached.push(coord);
            }
        }

        if uncached.is_empty() {
            return Ok(tiles);
        }

        debug!(
            cache = self.identifier(),
            missing = uncached.len(),
            requested = coords.len(),
            "Creating missing tiles"
        );
        let created: HashMap<TileCoord, Tile> = self
            .creator(priority)
            .create_tiles(&uncached)?
            .into_iter()
            .filter_map(|tile| tile.coord.map(|c| (c, tile)))
            .collect();

        for tile in tiles.iter_mut() {
            if let Some(new) = tile.coord.and_then(|c| created.get(&c)) {
                *tile = new.clone();
            }
        }
        Ok(tiles)
    }

    /// Delete tiles from storage; returns how many existed.
    pub fn remove_tiles(&self, coords: &[Option<TileCoord>]) -> Result<usize, ManagerError> {
        let mut removed = 0;
        for coord in coords.iter().flatten() {
            if self.storage.remove(&Tile::new(Some(*coord)))? {
                removed += 1;
            }
        }
        info!(cache = self.identifier(), removed, "Removed tiles");
        Ok(removed)
    }

    /// Lock the meta-tile containing `coord`.
    pub fn lock(&self, coord: TileCoord) -> Result<TileLockGuard, ManagerError> {
        let main_tile = match &self.meta_grid {
            Some(meta_grid) => meta_grid.main_tile(coord)?,
            None => coord,
        };
        Ok(self.locker.lock(main_tile)?)
    }

    /// A creator rendering with `priority`.
    pub fn creator(&self, priority: RenderPriority) -> TileCreator<'_> {
        TileCreator::new(self, priority)
    }

    fn all_cached(&self, coords: &[TileCoord]) -> Result<bool, ManagerError> {
        for coord in coords {
            if !self.is_cached(Some(*coord))? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Load a tile known to be stored.
    fn load_stored(&self, coord: TileCoord) -> Result<Tile, ManagerError> {
        let mut tile = Tile::new(Some(coord));
        self.storage.load(&mut tile)?;
        Ok(tile)
    }
}

/// Builder for [`TileManager`].
pub struct TileManagerBuilder {
    grid: Arc<TileGrid>,
    storage: Arc<dyn TileStorage>,
    sources: Vec<Arc<dyn Source>>,
    format: ImageFormat,
    locker: Option<Arc<dyn TileLocker>>,
    meta_size: (u32, u32),
    meta_buffer: u32,
    bulk_meta_tiles: bool,
    minimize_meta_requests: bool,
    concurrent_tile_creators: usize,
    expire_timestamp: Option<SystemTime>,
    filters: Vec<Arc<dyn TileFilter>>,
    delegate: Option<Arc<dyn RenderDelegate>>,
    error_policy: SourceErrorPolicy,
}

impl TileManagerBuilder {
    pub fn new(grid: Arc<TileGrid>, storage: Arc<dyn TileStorage>) -> Self {
        Self {
            grid,
            storage,
            sources: Vec::new(),
            format: ImageFormat::default(),
            locker: None,
            meta_size: (1, 1),
            meta_buffer: 0,
            bulk_meta_tiles: false,
            minimize_meta_requests: false,
            concurrent_tile_creators: 1,
            expire_timestamp: None,
            filters: Vec::new(),
            delegate: None,
            error_policy: SourceErrorPolicy::default(),
        }
    }

    /// Append a source; sources are composited in the order added.
    pub fn source(mut self, source: Arc<dyn Source>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn sources(mut self, sources: Vec<Arc<dyn Source>>) -> Self {
        self.sources = sources;
        self
    }

    pub fn format(mut self, format: ImageFormat) -> Self {
        self.format = format;
        self
    }

    /// Locker for meta-tile renders; defaults to an [`InProcessLocker`].
    pub fn locker(mut self, locker: Arc<dyn TileLocker>) -> Self {
        self.locker = Some(locker);
        self
    }

    /// Tiles per meta-tile along each axis.
    pub fn meta_size(mut self, width: u32, height: u32) -> Self {
        self.meta_size = (width, height);
        self
    }

    /// Pixel buffer around each meta-tile.
    pub fn meta_buffer(mut self, pixels: u32) -> Self {
        self.meta_buffer = pixels;
        self
    }

    pub fn bulk_meta_tiles(mut self, enabled: bool) -> Self {
        self.bulk_meta_tiles = enabled;
        self
    }

    pub fn minimize_meta_requests(mut self, enabled: bool) -> Self {
        self.minimize_meta_requests = enabled;
        self
    }

    pub fn concurrent_tile_creators(mut self, count: usize) -> Self {
        self.concurrent_tile_creators = count;
        self
    }

    /// Treat tiles stored before `timestamp` as stale.
    pub fn expire_timestamp(mut self, timestamp: SystemTime) -> Self {
        self.expire_timestamp = Some(timestamp);
        self
    }

    pub fn filter(mut self, filter: Arc<dyn TileFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Render through `delegate` instead of the sources.
    pub fn delegate(mut self, delegate: Arc<dyn RenderDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    pub fn error_policy(mut self, policy: SourceErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Validate the configuration and build the manager.
    ///
    /// # Errors
    ///
    /// [`ManagerError::Config`] if meta-tiling is configured and only some
    /// of the sources support meta-tile requests, or if the creator count
    /// is zero.
    pub fn build(self) -> Result<TileManager, ManagerError> {
        if self.concurrent_tile_creators == 0 {
            return Err(ManagerError::Config(
                "concurrent_tile_creators must be at least 1".to_string(),
            ));
        }
        if self.meta_size.0 == 0 || self.meta_size.1 == 0 {
            return Err(ManagerError::Config("meta_size must not be zero".to_string()));
        }

        let wants_meta = self.meta_size != (1, 1) || self.meta_buffer > 0;
        let supporting = self.sources.iter().filter(|s| s.supports_meta_tiles()).count();

        let (meta_grid, bulk) = if !wants_meta {
            (None, false)
        } else if self.delegate.is_some() || supporting == self.sources.len() {
            (
                Some(MetaGrid::new(self.grid.clone(), self.meta_size, self.meta_buffer)),
                false,
            )
        } else if supporting > 0 {
            let unsupported: Vec<&str> = self
                .sources
                .iter()
                .filter(|s| !s.supports_meta_tiles())
                .map(|s| s.name())
                .collect();
            return Err(ManagerError::Config(format!(
                "meta tiling configured but not supported by all sources (unsupported: {})",
                unsupported.join(", ")
            )));
        } else if self.bulk_meta_tiles {
            (Some(MetaGrid::new(self.grid.clone(), self.meta_size, 0)), true)
        } else {
            (None, false)
        };

        let locker = match self.locker {
            Some(locker) => locker,
            None => Arc::new(InProcessLocker::new(
                self.storage.identifier(),
                DEFAULT_LOCK_TIMEOUT,
            )),
        };

        Ok(TileManager {
            grid: self.grid,
            storage: self.storage,
            sources: self.sources,
            format: self.format,
            locker,
            meta_grid,
            bulk_meta_tiles: bulk,
            minimize_meta_requests: self.minimize_meta_requests,
            concurrent_tile_creators: self.concurrent_tile_creators,
            expire_timestamp: self.expire_timestamp,
            filters: self.filters,
            delegate: self.delegate,
            error_policy: self.error_policy,
        })
    }
}
