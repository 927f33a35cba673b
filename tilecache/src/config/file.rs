//! Configuration file handling for `~/.tilecache/config.ini`.
//!
//! Settings structs live in [`super::settings`], parsing in
//! [`super::parser`] and serialization in [`super::writer`]. This module
//! loads and saves the file and turns settings into grids, lockers and
//! managers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use crate::cache::{MemoryTileStorage, TileStorage};
use crate::grid::{GridError, ResolutionScheme, TileGrid};
use crate::lock::{LockConfig, LockError, DEFAULT_LOCK_POLL_INTERVAL};
use crate::manager::TileManagerBuilder;
use crate::seed::CacheLocker;
use crate::srs::{SrsError, SrsRegistry};

pub use super::settings::*;

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Failed to write config file
    #[error("Failed to write config file: {0}")]
    WriteError(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    /// Failed to create config directory
    #[error("Failed to create config directory: {0}")]
    DirectoryError(std::io::Error),

    #[error("Invalid grid configuration: {0}")]
    Grid(#[from] GridError),

    #[error("Invalid grid SRS: {0}")]
    Srs(#[from] SrsError),

    #[error("Invalid lock configuration: {0}")]
    Lock(#[from] LockError),
}

impl ConfigFile {
    /// Load configuration from the default path (`~/.tilecache/config.ini`).
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        super::parser::parse_ini(&ini)
    }

    /// Save configuration to the default path.
    pub fn save(&self) -> Result<(), ConfigFileError> {
        self.save_to(&config_file_path())
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigFileError::DirectoryError)?;
        }

        let content = super::writer::to_config_string(self);
        std::fs::write(path, content).map_err(|e| ConfigFileError::WriteError(e.to_string()))
    }

    /// Create the default config file if it doesn't exist.
    ///
    /// Returns the path to the config file.
    pub fn ensure_exists() -> Result<PathBuf, ConfigFileError> {
        let path = config_file_path();
        if !path.exists() {
            Self::default().save_to(&path)?;
        }
        Ok(path)
    }

    /// Build the tile grid described by `[grid]`, resolving its SRS through
    /// `registry`.
    ///
    /// Explicit `res` wins; otherwise `min_res`/`max_res` select a range,
    /// and without either the grid is derived from `res_factor`.
    pub fn tile_grid(&self, registry: &SrsRegistry) -> Result<TileGrid, ConfigFileError> {
        let settings = &self.grid;
        let scheme = if let Some(res) = &settings.res {
            ResolutionScheme::Explicit(res.clone())
        } else if settings.min_res.is_some() || settings.max_res.is_some() {
            ResolutionScheme::Range {
                min_res: settings.min_res,
                max_res: settings.max_res,
                num_levels: settings.num_levels,
                factor: settings.res_factor,
            }
        } else {
            ResolutionScheme::Factor {
                factor: settings.res_factor,
                num_levels: settings.num_levels,
            }
        };

        let mut builder = TileGrid::builder()
            .srs(registry.get(&settings.srs)?)
            .tile_size(settings.tile_size.0, settings.tile_size.1)
            .origin(settings.origin)
            .resolutions(scheme)
            .threshold_res(settings.threshold_res.clone())
            .stretch_factor(settings.stretch_factor)
            .max_shrink_factor(settings.max_shrink_factor);
        if let Some(name) = &settings.name {
            builder = builder.name(name.clone());
        }
        if let Some(bbox) = settings.bbox {
            builder = builder.bbox(bbox);
        }
        Ok(builder.build()?)
    }

    /// Tile locker settings from `[lock]`.
    pub fn lock_config(&self) -> LockConfig {
        LockConfig {
            kind: self.lock.kind,
            directory: Some(self.lock.directory.clone()),
            timeout: Duration::from_secs(self.lock.timeout_secs),
            poll_interval: DEFAULT_LOCK_POLL_INTERVAL,
        }
    }

    /// Seed locker from `[seed]`.
    pub fn cache_locker(&self) -> CacheLocker {
        let locker = CacheLocker::new(&self.seed.lock_file)
            .with_poll_interval(Duration::from_millis(self.seed.poll_interval_ms));
        match self.seed.timeout_secs {
            Some(secs) => locker.with_timeout(Duration::from_secs(secs)),
            None => locker,
        }
    }

    /// In-memory storage sized and named by `[cache]`.
    pub fn memory_storage(&self) -> Arc<MemoryTileStorage> {
        Arc::new(MemoryTileStorage::new(
            self.cache.name.clone(),
            self.cache.memory_size,
        ))
    }

    /// A manager builder with the `[cache]` and `[lock]` settings applied.
    ///
    /// Sources, filters and a delegate are added by the caller.
    pub fn manager_builder(
        &self,
        grid: Arc<TileGrid>,
        storage: Arc<dyn TileStorage>,
    ) -> Result<TileManagerBuilder, ConfigFileError> {
        let locker = self.lock_config().build(storage.identifier())?;
        let cache = &self.cache;
        Ok(TileManagerBuilder::new(grid, storage)
            .format(cache.format)
            .meta_size(cache.meta_size.0, cache.meta_size.1)
            .meta_buffer(cache.meta_buffer)
            .minimize_meta_requests(cache.minimize_meta_requests)
            .bulk_meta_tiles(cache.bulk_meta_tiles)
            .concurrent_tile_creators(cache.concurrent_tile_creators)
            .locker(locker))
    }
}

/// Get the path to the config directory (`~/.tilecache`).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tilecache")
}

/// Get the path to the config file (`~/.tilecache/config.ini`).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::{Origin, TileCoord};
    use crate::lock::LockKind;
    use crate::source::SolidSource;

    #[test]
    fn test_default_config() {
        let config = ConfigFile::default();

        assert_eq!(config.grid.srs, DEFAULT_GRID_SRS);
        assert_eq!(config.cache.meta_size, (4, 4));
        assert_eq!(config.cache.meta_buffer, 80);
        assert_eq!(config.lock.kind, LockKind::InProcess);
        assert!(config.seed.lock_file.ends_with("seed_locks.sqlite"));
    }

    #[test]
    fn test_load_nonexistent_returns_defaults() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.ini");

        let config = ConfigFile::load_from(&config_path).unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.ini");

        let mut config = ConfigFile::default();
        config.grid.name = Some("local".to_string());
        config.grid.origin = Origin::UpperLeft;
        config.grid.res = Some(vec![1000.0, 500.0, 250.0]);
        config.cache.name = "osm".to_string();
        config.cache.meta_size = (2, 3);
        config.seed.timeout_secs = Some(90);
        config.save_to(&path).unwrap();

        let loaded = ConfigFile::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_default_grid_is_global_mercator() {
        let grid = ConfigFile::default().tile_grid(&SrsRegistry::default()).unwrap();
        let reference = TileGrid::global_mercator();
        assert_eq!(grid.resolutions(), reference.resolutions());
        assert_eq!(grid.bbox(), reference.bbox());
    }

    #[test]
    fn test_explicit_resolutions() {
        let mut config = ConfigFile::default();
        config.grid.srs = "EPSG:4326".to_string();
        config.grid.res = Some(vec![1.0, 0.5]);
        let grid = config.tile_grid(&SrsRegistry::default()).unwrap();
        assert_eq!(grid.levels(), 2);
        assert_eq!(grid.resolution(1).unwrap(), 0.5);
    }

    #[test]
    fn test_invalid_grid_rejected() {
        let registry = SrsRegistry::default();
        let mut config = ConfigFile::default();
        config.grid.res = Some(vec![1.0, 2.0]);
        assert!(matches!(config.tile_grid(&registry), Err(ConfigFileError::Grid(_))));

        config.grid.res = None;
        config.grid.srs = "not-an-srs".to_string();
        assert!(matches!(config.tile_grid(&registry), Err(ConfigFileError::Srs(_))));
    }

    #[test]
    fn test_manager_builder_applies_cache_settings() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let mut config = ConfigFile::default();
        config.cache.name = "osm".to_string();
        config.cache.meta_size = (2, 2);
        config.cache.meta_buffer = 0;
        config.lock.kind = LockKind::File;
        config.lock.directory = temp_dir.path().to_path_buf();

        let grid = Arc::new(config.tile_grid(&SrsRegistry::default()).unwrap());
        let manager = config
            .manager_builder(grid, config.memory_storage())
            .unwrap()
            .source(Arc::new(SolidSource::new("bg", [0, 0, 0, 255])))
            .build()
            .unwrap();

        assert_eq!(manager.identifier(), "osm");
        assert_eq!(manager.meta_grid().unwrap().meta_size(), (2, 2));
        manager.load_tile(TileCoord::new(0, 0, 1)).unwrap();
        assert!(manager.is_cached(Some(TileCoord::new(1, 1, 1))).unwrap());
    }

    #[test]
    fn test_grids_share_registry_entries() {
        let registry = SrsRegistry::default();
        let mut config = ConfigFile::default();
        config.tile_grid(&registry).unwrap();
        config.grid.res = Some(vec![1000.0, 500.0]);
        config.tile_grid(&registry).unwrap();
        assert_eq!(registry.len(), 1);

        config.grid.srs = "EPSG:4326".to_string();
        config.grid.res = None;
        let geodetic = config.tile_grid(&registry).unwrap();
        assert!(geodetic.srs().is_geographic());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_cache_locker_settings() {
        let mut config = ConfigFile::default();
        config.seed.lock_file = PathBuf::from("/tmp/locks.sqlite");
        let locker = config.cache_locker();
        assert_eq!(locker.path(), Path::new("/tmp/locks.sqlite"));
    }
}
