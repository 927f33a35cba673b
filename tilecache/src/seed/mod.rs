//! Whole-cache exclusivity for seeding runs.
//!
//! Seeding processes serialize per cache through a shared SQLite database
//! with one table:
//!
//! ```sql
//! CREATE TABLE cache_locks (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     cache_name TEXT, created REAL, pid INTEGER
//! )
//! ```
//!
//! Every holder or waiter owns one row. Waiters queue by `id`, which only
//! grows, so the order does not depend on process clocks. A waiter is
//! granted the lock once no row of a live process precedes its own; rows of
//! dead processes are purged while scanning. Release deletes the row.
//! `created` is informational.

mod liveness;

#[cfg(unix)]
pub use liveness::PosixLiveness;
pub use liveness::{default_liveness, PortableLiveness, ProcessLiveness};

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, TransactionBehavior};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default wait between two polls of the lock table.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// SQLite busy timeout while another process holds the write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised by seed locking.
#[derive(Debug, Error)]
pub enum SeedLockError {
    /// Another live process holds the lock (non-blocking mode).
    #[error("Cache '{cache}' is locked by another process")]
    Locked { cache: String },

    /// The lock was not granted within the configured timeout.
    #[error("Timed out after {waited:?} waiting for the lock of cache '{cache}'")]
    Timeout { cache: String, waited: Duration },

    #[error("Lock database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Lock database I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SeedLockError {
    /// Returns `true` if the lock was held by someone else.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SeedLockError::Locked { .. } | SeedLockError::Timeout { .. }
        )
    }
}

/// Behavior when the lock is held by another process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    /// Poll until granted (or the timeout passes).
    #[default]
    Blocking,
    /// Fail immediately with [`SeedLockError::Locked`].
    NonBlocking,
}

/// Held seed lock; released when dropped.
#[must_use = "the lock is released when the guard is dropped"]
pub struct CacheLockGuard {
    cache: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl CacheLockGuard {
    fn new(cache: String, release: Box<dyn FnOnce() + Send>) -> Self {
        Self {
            cache,
            release: Some(release),
        }
    }

    fn unlocked(cache: String) -> Self {
        Self {
            cache,
            release: None,
        }
    }

    pub fn cache_name(&self) -> &str {
        &self.cache
    }

    /// Release now instead of at drop.
    pub fn release(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for CacheLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheLockGuard")
            .field("cache", &self.cache)
            .field("held", &self.release.is_some())
            .finish()
    }
}

impl Drop for CacheLockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Acquires whole-cache locks.
pub trait CacheLock: Send + Sync {
    fn lock(&self, cache_name: &str, mode: LockMode) -> Result<CacheLockGuard, SeedLockError>;
}

/// Cache lock that grants everything, for callers that do not coordinate.
#[derive(Debug, Default, Clone, Copy)]
pub struct DummyCacheLocker;

impl CacheLock for DummyCacheLocker {
    fn lock(&self, cache_name: &str, _mode: LockMode) -> Result<CacheLockGuard, SeedLockError> {
        Ok(CacheLockGuard::unlocked(cache_name.to_string()))
    }
}

/// SQLite-backed cross-process cache lock.
#[derive(Debug, Clone)]
pub struct CacheLocker {
    path: PathBuf,
    pid: u32,
    poll_interval: Duration,
    timeout: Option<Duration>,
    liveness: Arc<dyn ProcessLiveness>,
}

impl CacheLocker {
    /// Create a locker using the database at `path` (created on demand).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pid: std::process::id(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
            liveness: default_liveness(),
        }
    }

    /// Record locks under `pid` instead of the current process id.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn with_liveness(mut self, liveness: Arc<dyn ProcessLiveness>) -> Self {
        self.liveness = liveness;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Give up blocking acquisitions after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    fn connect(&self) -> Result<Connection, SeedLockError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS cache_locks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                cache_name TEXT NOT NULL,
                created REAL NOT NULL,
                pid INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(conn)
    }

    /// One poll: make sure our row exists, purge dead holders ahead of it,
    /// and report whether it is now first in line.
    fn poll(&self, conn: &mut Connection, cache_name: &str) -> Result<bool, SeedLockError> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM cache_locks WHERE cache_name = ?1 AND pid = ?2)",
            params![cache_name, self.pid],
            |row| row.get(0),
        )?;
        if !exists {
            tx.execute(
                "INSERT INTO cache_locks (cache_name, created, pid) VALUES (?1, ?2, ?3)",
                params![cache_name, now_seconds(), self.pid],
            )?;
        }

        let rows: Vec<u32> = {
            let mut stmt = tx.prepare(
                "SELECT pid FROM cache_locks WHERE cache_name = ?1 ORDER BY id",
            )?;
            let pids = stmt.query_map(params![cache_name], |row| row.get(0))?;
            pids.collect::<Result<_, _>>()?
        };

        let mut granted = false;
        for pid in rows {
            if pid == self.pid {
                granted = true;
                break;
            }
            if self.liveness.is_alive(pid) {
                break;
            }
            info!(cache = cache_name, pid, "Removing seed lock of dead process");
            tx.execute(
                "DELETE FROM cache_locks WHERE cache_name = ?1 AND pid = ?2",
                params![cache_name, pid],
            )?;
        }

        tx.commit()?;
        Ok(granted)
    }

    fn remove_lock(conn: &Connection, cache_name: &str, pid: u32) -> Result<(), SeedLockError> {
        conn.execute(
            "DELETE FROM cache_locks WHERE cache_name = ?1 AND pid = ?2",
            params![cache_name, pid],
        )?;
        Ok(())
    }

    /// Rows currently recorded for `cache_name` in queue order, as pids.
    pub fn holders(&self, cache_name: &str) -> Result<Vec<u32>, SeedLockError> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT pid FROM cache_locks WHERE cache_name = ?1 ORDER BY id")?;
        let pids = stmt.query_map(params![cache_name], |row| row.get(0))?;
        Ok(pids.collect::<Result<_, _>>()?)
    }
}

impl CacheLock for CacheLocker {
    fn lock(&self, cache_name: &str, mode: LockMode) -> Result<CacheLockGuard, SeedLockError> {
        let mut conn = self.connect()?;
        let started = Instant::now();
        let mut announced = false;

        loop {
            if self.poll(&mut conn, cache_name)? {
                debug!(cache = cache_name, pid = self.pid, "Acquired seed lock");
                let cache = cache_name.to_string();
                let pid = self.pid;
                return Ok(CacheLockGuard::new(
                    cache_name.to_string(),
                    Box::new(move || {
                        if let Err(e) = Self::remove_lock(&conn, &cache, pid) {
                            warn!(cache = %cache, error = %e, "Failed to release seed lock");
                        } else {
                            debug!(cache = %cache, pid, "Released seed lock");
                        }
                    }),
                ));
            }

            if mode == LockMode::NonBlocking {
                Self::remove_lock(&conn, cache_name, self.pid)?;
                return Err(SeedLockError::Locked {
                    cache: cache_name.to_string(),
                });
            }

            if let Some(timeout) = self.timeout {
                if started.elapsed() >= timeout {
                    Self::remove_lock(&conn, cache_name, self.pid)?;
                    warn!(cache = cache_name, "Timed out waiting for seed lock");
                    return Err(SeedLockError::Timeout {
                        cache: cache_name.to_string(),
                        waited: started.elapsed(),
                    });
                }
            }

            if !announced {
                info!(cache = cache_name, "Waiting for seed lock held by another process");
                announced = true;
            }
            thread::sleep(self.poll_interval);
        }
    }
}

fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
