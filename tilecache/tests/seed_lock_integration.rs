//! Integration tests for seed locking across processes.
//!
//! Separate processes are simulated by lockers recording different pids in
//! one lock database. Holders that really died are produced by spawning and
//! reaping a short-lived child process.
//!
//! Run with: `cargo test --test seed_lock_integration`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tilecache::seed::{CacheLock, CacheLocker, LockMode, SeedLockError};

fn locker(dir: &TempDir, pid: u32) -> CacheLocker {
    CacheLocker::new(dir.path().join("locks.sqlite"))
        .with_pid(pid)
        .with_poll_interval(Duration::from_millis(20))
}

/// Pid of a process that has exited and been reaped.
#[cfg(unix)]
fn dead_pid() -> u32 {
    let mut child = std::process::Command::new("true").spawn().unwrap();
    let pid = child.id();
    child.wait().unwrap();
    pid
}

#[test]
fn test_blocking_waiter_acquires_after_release() {
    let dir = TempDir::new().unwrap();
    let holder = locker(&dir, std::process::id());
    let guard = holder.lock("osm", LockMode::Blocking).unwrap();

    let acquired = Arc::new(AtomicBool::new(false));
    let flag = acquired.clone();
    let path = dir.path().join("locks.sqlite");
    let waiter = thread::spawn(move || {
        let other = CacheLocker::new(path)
            .with_pid(std::process::id() + 100_000)
            .with_poll_interval(Duration::from_millis(20));
        let guard = other.lock("osm", LockMode::Blocking).unwrap();
        flag.store(true, Ordering::SeqCst);
        drop(guard);
    });

    thread::sleep(Duration::from_millis(200));
    assert!(!acquired.load(Ordering::SeqCst));

    guard.release();
    waiter.join().unwrap();
    assert!(acquired.load(Ordering::SeqCst));
    assert!(holder.holders("osm").unwrap().is_empty());
}

#[test]
fn test_non_blocking_fails_while_held() {
    let dir = TempDir::new().unwrap();
    let holder = locker(&dir, std::process::id());
    let _guard = holder.lock("osm", LockMode::Blocking).unwrap();

    let other = locker(&dir, std::process::id() + 100_000);
    let err = other.lock("osm", LockMode::NonBlocking).unwrap_err();
    assert!(matches!(err, SeedLockError::Locked { ref cache } if cache == "osm"));
    assert!(err.is_retryable());

    // The failed attempt leaves no row behind
    assert_eq!(holder.holders("osm").unwrap(), vec![std::process::id()]);
}

#[test]
fn test_caches_lock_independently() {
    let dir = TempDir::new().unwrap();
    let a = locker(&dir, std::process::id());
    let b = locker(&dir, std::process::id() + 100_000);

    let _osm = a.lock("osm", LockMode::Blocking).unwrap();
    let aerial = b.lock("aerial", LockMode::NonBlocking).unwrap();
    assert_eq!(aerial.cache_name(), "aerial");
}

#[test]
fn test_timeout_while_held() {
    let dir = TempDir::new().unwrap();
    let _guard = locker(&dir, std::process::id())
        .lock("osm", LockMode::Blocking)
        .unwrap();

    let started = Instant::now();
    let err = locker(&dir, std::process::id() + 100_000)
        .with_timeout(Duration::from_millis(150))
        .lock("osm", LockMode::Blocking)
        .unwrap_err();
    assert!(matches!(err, SeedLockError::Timeout { .. }));
    assert!(started.elapsed() >= Duration::from_millis(150));
}

#[cfg(unix)]
#[test]
fn test_lock_of_dead_process_is_reclaimed() {
    let dir = TempDir::new().unwrap();
    let dead = dead_pid();

    // A holder that never released: its process is gone
    let stale = locker(&dir, dead).lock("osm", LockMode::Blocking).unwrap();
    std::mem::forget(stale);

    let live = locker(&dir, std::process::id());
    assert_eq!(live.holders("osm").unwrap(), vec![dead]);

    let guard = live.lock("osm", LockMode::NonBlocking).unwrap();
    assert_eq!(live.holders("osm").unwrap(), vec![std::process::id()]);
    drop(guard);
    assert!(live.holders("osm").unwrap().is_empty());
}
