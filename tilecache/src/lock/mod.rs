//! Meta-tile locking.
//!
//! At most one render may run per meta-tile of a cache. Renders lock the
//! main tile (lowest x and y) of their meta-tile; two requests inside the
//! same meta-tile therefore compute the same [`LockKey`] and serialize,
//! while disjoint meta-tiles proceed independently.
//!
//! Lockers are built once per cache from a [`LockConfig`]:
//!
//! - [`InProcessLocker`] - threads of one process
//! - [`FileLocker`] - threads and processes sharing a lock directory
//! - [`NoopLocker`] - no exclusion, for single-writer tools
//!
//! The [`TileLockGuard`] returned by [`TileLocker::lock`] releases the lock
//! when dropped, on every exit path.

mod file;
mod memory;

pub use file::FileLocker;
pub use memory::InProcessLocker;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::coord::TileCoord;

/// Default time to wait for a meta-tile lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// Default poll interval of [`FileLocker`].
pub const DEFAULT_LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Identity of one meta-tile render.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub cache: Arc<str>,
    pub coord: TileCoord,
}

impl LockKey {
    pub fn new(cache: impl Into<Arc<str>>, coord: TileCoord) -> Self {
        Self {
            cache: cache.into(),
            coord,
        }
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            self.cache, self.coord.z, self.coord.x, self.coord.y
        )
    }
}

/// Errors raised while acquiring a lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock was not released within the timeout.
    #[error("Timed out after {waited:?} waiting for lock {key}")]
    Timeout { key: String, waited: Duration },

    #[error("Lock I/O error for {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid lock configuration: {0}")]
    Config(String),
}

impl LockError {
    /// Returns `true` if trying again later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LockError::Timeout { .. })
    }
}

/// Releases a held lock. Implemented by each locker's guard state.
pub trait LockRelease: Send {
    fn release(self: Box<Self>);
}

/// Scoped ownership of a meta-tile lock.
#[must_use = "the lock is released when the guard is dropped"]
pub struct TileLockGuard {
    key: LockKey,
    acquired: Instant,
    inner: Option<Box<dyn LockRelease>>,
}

impl TileLockGuard {
    pub fn new(key: LockKey, inner: Box<dyn LockRelease>) -> Self {
        Self {
            key,
            acquired: Instant::now(),
            inner: Some(inner),
        }
    }

    /// Guard that holds nothing.
    pub fn unlocked(key: LockKey) -> Self {
        Self {
            key,
            acquired: Instant::now(),
            inner: None,
        }
    }

    pub fn key(&self) -> &LockKey {
        &self.key
    }
}

impl fmt::Debug for TileLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileLockGuard")
            .field("key", &self.key.to_string())
            .field("held", &self.inner.is_some())
            .finish()
    }
}

impl Drop for TileLockGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.release();
            tracing::trace!(
                key = %self.key,
                held_ms = self.acquired.elapsed().as_millis() as u64,
                "Released tile lock"
            );
        }
    }
}

/// Mutual exclusion for meta-tile renders of one cache.
pub trait TileLocker: Send + Sync + fmt::Debug {
    /// Block until the lock for `main_tile` is held or the timeout passes.
    fn lock(&self, main_tile: TileCoord) -> Result<TileLockGuard, LockError>;
}

/// Locker that never blocks.
#[derive(Debug, Clone)]
pub struct NoopLocker {
    cache: Arc<str>,
}

impl NoopLocker {
    pub fn new(cache: impl Into<Arc<str>>) -> Self {
        Self {
            cache: cache.into(),
        }
    }
}

impl TileLocker for NoopLocker {
    fn lock(&self, main_tile: TileCoord) -> Result<TileLockGuard, LockError> {
        Ok(TileLockGuard::unlocked(LockKey::new(
            self.cache.clone(),
            main_tile,
        )))
    }
}

/// Locking strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockKind {
    #[default]
    InProcess,
    File,
    Noop,
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LockKind::InProcess => "memory",
            LockKind::File => "file",
            LockKind::Noop => "none",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for LockKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "in_process" | "inprocess" | "thread" => Ok(LockKind::InProcess),
            "file" => Ok(LockKind::File),
            "none" | "noop" | "dummy" => Ok(LockKind::Noop),
            other => Err(format!(
                "unknown lock kind '{}' (expected memory, file or none)",
                other
            )),
        }
    }
}

/// Locker settings, turned into a locker once per cache.
#[derive(Debug, Clone, PartialEq)]
pub struct LockConfig {
    pub kind: LockKind,
    /// Lock file directory; required for [`LockKind::File`].
    pub directory: Option<PathBuf>,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            kind: LockKind::default(),
            directory: None,
            timeout: DEFAULT_LOCK_TIMEOUT,
            poll_interval: DEFAULT_LOCK_POLL_INTERVAL,
        }
    }
}

impl LockConfig {
    /// Build the locker for the cache named `cache_id`.
    pub fn build(&self, cache_id: &str) -> Result<Arc<dyn TileLocker>, LockError> {
        let locker: Arc<dyn TileLocker> = match self.kind {
            LockKind::InProcess => Arc::new(InProcessLocker::new(cache_id, self.timeout)),
            LockKind::File => {
                let directory = self.directory.clone().ok_or_else(|| {
                    LockError::Config("file locking requires a lock directory".to_string())
                })?;
                Arc::new(
                    FileLocker::new(directory, cache_id, self.timeout)
                        .with_poll_interval(self.poll_interval),
                )
            }
            LockKind::Noop => Arc::new(NoopLocker::new(cache_id)),
        };
        tracing::debug!(cache = cache_id, kind = %self.kind, "Built tile locker");
        Ok(locker)
    }
}
