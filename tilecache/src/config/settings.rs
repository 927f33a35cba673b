//! Configuration settings structs and their defaults.

use std::path::PathBuf;

use crate::cache::DEFAULT_MEMORY_STORAGE_BYTES;
use crate::coord::{BBox, Origin};
use crate::grid::{
    ResFactor, DEFAULT_MAX_SHRINK_FACTOR, DEFAULT_STRETCH_FACTOR, DEFAULT_TILE_SIZE,
};
use crate::lock::{LockKind, DEFAULT_LOCK_TIMEOUT};
use crate::seed::DEFAULT_POLL_INTERVAL;
use crate::source::ImageFormat;

/// Default SRS of a configured grid.
pub const DEFAULT_GRID_SRS: &str = "EPSG:900913";

/// Default meta-tile size in tiles.
pub const DEFAULT_META_SIZE: (u32, u32) = (4, 4);

/// Default meta-tile buffer in pixels.
pub const DEFAULT_META_BUFFER: u32 = 80;

/// Default number of parallel tile creators per request.
pub const DEFAULT_CONCURRENT_TILE_CREATORS: usize = 2;

/// Parsed contents of `config.ini`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigFile {
    pub grid: GridSettings,
    pub cache: CacheSettings,
    pub lock: LockSettings,
    pub seed: SeedSettings,
}

/// `[grid]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSettings {
    pub name: Option<String>,
    pub srs: String,
    /// Defaults to the SRS extent.
    pub bbox: Option<BBox>,
    pub tile_size: (u32, u32),
    pub origin: Origin,
    /// Explicit resolutions; overrides every other resolution key.
    pub res: Option<Vec<f64>>,
    pub res_factor: ResFactor,
    pub num_levels: Option<usize>,
    pub min_res: Option<f64>,
    pub max_res: Option<f64>,
    pub threshold_res: Vec<f64>,
    pub stretch_factor: f64,
    pub max_shrink_factor: f64,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            name: None,
            srs: DEFAULT_GRID_SRS.to_string(),
            bbox: None,
            tile_size: DEFAULT_TILE_SIZE,
            origin: Origin::LowerLeft,
            res: None,
            res_factor: ResFactor::default(),
            num_levels: None,
            min_res: None,
            max_res: None,
            threshold_res: Vec::new(),
            stretch_factor: DEFAULT_STRETCH_FACTOR,
            max_shrink_factor: DEFAULT_MAX_SHRINK_FACTOR,
        }
    }
}

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    pub name: String,
    pub format: ImageFormat,
    pub meta_size: (u32, u32),
    pub meta_buffer: u32,
    pub minimize_meta_requests: bool,
    pub bulk_meta_tiles: bool,
    pub concurrent_tile_creators: usize,
    /// Capacity of the in-memory tile storage in bytes.
    pub memory_size: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            format: ImageFormat::default(),
            meta_size: DEFAULT_META_SIZE,
            meta_buffer: DEFAULT_META_BUFFER,
            minimize_meta_requests: false,
            bulk_meta_tiles: false,
            concurrent_tile_creators: DEFAULT_CONCURRENT_TILE_CREATORS,
            memory_size: DEFAULT_MEMORY_STORAGE_BYTES,
        }
    }
}

/// `[lock]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct LockSettings {
    pub kind: LockKind,
    pub directory: PathBuf,
    pub timeout_secs: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            kind: LockKind::default(),
            directory: super::config_directory().join("locks"),
            timeout_secs: DEFAULT_LOCK_TIMEOUT.as_secs(),
        }
    }
}

/// `[seed]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedSettings {
    /// SQLite database holding the seed locks.
    pub lock_file: PathBuf,
    pub poll_interval_ms: u64,
    /// Give up waiting for a seed lock after this many seconds.
    pub timeout_secs: Option<u64>,
}

impl Default for SeedSettings {
    fn default() -> Self {
        Self {
            lock_file: super::config_directory().join("seed_locks.sqlite"),
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            timeout_secs: None,
        }
    }
}
