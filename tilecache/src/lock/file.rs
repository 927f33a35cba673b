//! Lock files shared between processes.
//!
//! Each key maps to `{directory}/{cache}-{z}-{x}-{y}.lck`. On Unix the file
//! is held with an exclusive `flock`, which the kernel drops when the holder
//! exits, so a crashed process never leaves a stuck lock behind. Elsewhere
//! the file is created exclusively and its existence is the lock.
//!
//! The lock file is deleted on release. A waiter that opened the file just
//! before deletion may then hold a lock on an unlinked inode; it checks that
//! the path still refers to the file it locked and retries otherwise.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::coord::TileCoord;

use super::{LockError, LockKey, LockRelease, TileLockGuard, TileLocker, DEFAULT_LOCK_POLL_INTERVAL};

/// Cross-process locker using lock files.
#[derive(Debug, Clone)]
pub struct FileLocker {
    directory: PathBuf,
    cache: Arc<str>,
    timeout: Duration,
    poll_interval: Duration,
}

impl FileLocker {
    /// Create a locker writing lock files into `directory`.
    ///
    /// # Arguments
    ///
    /// * `directory` - Lock directory, created on first use
    /// * `cache` - Cache name, prefixed to every lock file name
    /// * `timeout` - Maximum time to wait for a lock
    pub fn new(directory: impl Into<PathBuf>, cache: impl Into<Arc<str>>, timeout: Duration) -> Self {
        Self {
            directory: directory.into(),
            cache: cache.into(),
            timeout,
            poll_interval: DEFAULT_LOCK_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the lock file for `key`.
    pub fn lock_path(&self, key: &LockKey) -> PathBuf {
        self.directory.join(format!("{}.lck", key))
    }
}

impl TileLocker for FileLocker {
    fn lock(&self, main_tile: TileCoord) -> Result<TileLockGuard, LockError> {
        let key = LockKey::new(self.cache.clone(), main_tile);
        let io_err = |source: io::Error| LockError::Io {
            key: key.to_string(),
            source,
        };

        fs::create_dir_all(&self.directory).map_err(io_err)?;
        let path = self.lock_path(&key);
        let started = Instant::now();

        loop {
            if let Some(file) = try_acquire(&path).map_err(io_err)? {
                tracing::trace!(key = %key, path = %path.display(), "Acquired lock file");
                return Ok(TileLockGuard::new(
                    key,
                    Box::new(HeldFile { path, file }),
                ));
            }
            if started.elapsed() >= self.timeout {
                tracing::warn!(key = %key, path = %path.display(), "Timed out waiting for lock file");
                return Err(LockError::Timeout {
                    key: key.to_string(),
                    waited: started.elapsed(),
                });
            }
            thread::sleep(self.poll_interval);
        }
    }
}

struct HeldFile {
    path: PathBuf,
    file: File,
}

impl LockRelease for HeldFile {
    fn release(self: Box<Self>) {
        // Unlink while still holding the lock; waiters on the old inode retry.
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove lock file");
            }
        }
        drop(self.file);
    }
}

/// One acquisition attempt; `Ok(None)` if another holder has the lock.
#[cfg(unix)]
fn try_acquire(path: &Path) -> io::Result<Option<File>> {
    use std::os::unix::fs::MetadataExt;
    use std::os::unix::io::AsRawFd;

    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)?;

    // SAFETY: the descriptor belongs to `file`, which outlives the call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        return match err.raw_os_error() {
            Some(code) if code == libc::EWOULDBLOCK || code == libc::EINTR => Ok(None),
            _ => Err(err),
        };
    }

    match fs::metadata(path) {
        Ok(on_disk) if on_disk.ino() == file.metadata()?.ino() => Ok(Some(file)),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(not(unix))]
fn try_acquire(path: &Path) -> io::Result<Option<File>> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => Ok(Some(file)),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(e),
    }
}
