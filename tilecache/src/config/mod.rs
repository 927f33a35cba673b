//! Configuration file support.
//!
//! A single INI file describes the grid, the cache, tile locking and seed
//! locking:
//!
//! ```ini
//! [grid]
//! srs = EPSG:900913
//! origin = ul
//!
//! [cache]
//! name = osm
//! meta_size = 4,4
//! meta_buffer = 80
//!
//! [lock]
//! kind = file
//! directory = ~/.tilecache/locks
//! ```
//!
//! # Example
//!
//! ```
//! use tilecache::config::ConfigFile;
//! use tilecache::srs::SrsRegistry;
//!
//! let registry = SrsRegistry::default();
//! let config = ConfigFile::default();
//! let grid = config.tile_grid(&registry).unwrap();
//! assert_eq!(grid.tile_size(), (256, 256));
//! ```

mod file;
mod parser;
mod settings;
mod writer;

pub use file::{config_directory, config_file_path, ConfigFile, ConfigFileError};
pub use settings::{
    CacheSettings, GridSettings, LockSettings, SeedSettings, DEFAULT_CONCURRENT_TILE_CREATORS,
    DEFAULT_GRID_SRS, DEFAULT_META_BUFFER, DEFAULT_META_SIZE,
};
