//! Integration tests for concurrent tile creation.
//!
//! These tests verify that concurrent requests are serialized per meta-tile:
//! - Requests inside one meta-tile cause exactly one upstream render
//! - Requests for disjoint meta-tiles render independently
//! - File locks serialize managers that share a storage, as separate
//!   processes would
//!
//! Run with: `cargo test --test tile_creation_integration`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use tilecache::cache::{MemoryTileStorage, TileStorage, DEFAULT_MEMORY_STORAGE_BYTES};
use tilecache::coord::TileCoord;
use tilecache::grid::TileGrid;
use tilecache::lock::{FileLocker, InProcessLocker, DEFAULT_LOCK_TIMEOUT};
use tilecache::manager::{RenderPriority, TileManager};
use tilecache::source::{ImageSource, MapQuery, Source, SourceError};

// ============================================================================
// Helpers
// ============================================================================

/// Source that counts renders and takes a while to answer.
struct SlowSource {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    delay: Duration,
}

impl SlowSource {
    fn new(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            delay,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most renders that were running at the same time.
    fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

impl Source for SlowSource {
    fn name(&self) -> &str {
        "slow"
    }

    fn get_map(&self, query: &MapQuery) -> Result<ImageSource, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        thread::sleep(self.delay);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(ImageSource::solid(query.size, [40, 80, 120, 255], query.format))
    }
}

fn storage() -> Arc<MemoryTileStorage> {
    Arc::new(MemoryTileStorage::new("osm", DEFAULT_MEMORY_STORAGE_BYTES))
}

fn meta_manager(source: Arc<SlowSource>, storage: Arc<dyn TileStorage>) -> TileManager {
    TileManager::builder(Arc::new(TileGrid::global_mercator()), storage)
        .source(source)
        .meta_size(4, 4)
        .meta_buffer(20)
        .build()
        .unwrap()
}

/// Run `f(i)` on `n` threads released at the same moment.
fn run_together<F>(n: usize, f: F)
where
    F: Fn(usize) + Send + Sync + 'static,
{
    let barrier = Arc::new(Barrier::new(n));
    let f = Arc::new(f);
    let handles: Vec<_> = (0..n)
        .map(|i| {
            let barrier = barrier.clone();
            let f = f.clone();
            thread::spawn(move || {
                barrier.wait();
                f(i);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

// ============================================================================
// Integration Tests
// ============================================================================

/// Eight clients asking for different tiles of one meta-tile share one render.
#[test]
fn test_same_meta_tile_renders_once() {
    let source = Arc::new(SlowSource::new(Duration::from_millis(100)));
    let manager = Arc::new(meta_manager(source.clone(), storage()));

    let m = manager.clone();
    run_together(8, move |i| {
        let coord = TileCoord::new((i % 4) as i64, (i / 4) as i64, 5);
        let tile = m.load_tile(coord).unwrap();
        assert!(tile.source.is_some());
    });

    assert_eq!(source.calls(), 1);
    for x in 0..4 {
        for y in 0..4 {
            assert!(manager.is_cached(Some(TileCoord::new(x, y, 5))).unwrap());
        }
    }
}

/// Clients in disjoint meta-tiles each trigger exactly one render, and
/// those renders overlap in time.
#[test]
fn test_disjoint_meta_tiles_render_independently() {
    let source = Arc::new(SlowSource::new(Duration::from_millis(200)));
    let manager = Arc::new(meta_manager(source.clone(), storage()));

    let m = manager.clone();
    run_together(8, move |i| {
        // Two clients per meta-tile, four meta-tiles
        let meta = (i / 2) as i64;
        let coord = TileCoord::new(meta * 4 + (i % 2) as i64, 0, 6);
        m.load_tile(coord).unwrap();
    });

    assert_eq!(source.calls(), 4);
    assert!(source.peak_in_flight() > 1);
}

/// Requests crossing the same meta-tiles in opposite order with parallel
/// creators and several sources finish without lock timeouts.
#[test]
fn test_crossing_requests_with_parallel_creators() {
    let a = Arc::new(SlowSource::new(Duration::from_millis(30)));
    let b = Arc::new(SlowSource::new(Duration::from_millis(30)));
    let manager = Arc::new(
        TileManager::builder(Arc::new(TileGrid::global_mercator()), storage())
            .source(a.clone())
            .source(b.clone())
            .meta_size(2, 2)
            .concurrent_tile_creators(4)
            .locker(Arc::new(InProcessLocker::new("osm", Duration::from_secs(5))))
            .build()
            .unwrap(),
    );

    let forward: Vec<_> = (0..4).map(|x| Some(TileCoord::new(x * 2, 0, 6))).collect();
    let m = manager.clone();
    run_together(4, move |i| {
        let mut coords = forward.clone();
        if i % 2 == 1 {
            coords.reverse();
        }
        let tiles = m.load_tiles(&coords).unwrap();
        assert!(tiles.all_loaded());
    });

    assert_eq!(a.calls(), 4);
    assert_eq!(b.calls(), 4);
}

/// Managers sharing storage and a lock directory coordinate through files.
#[test]
fn test_file_locks_coordinate_managers() {
    let lock_dir = tempfile::TempDir::new().unwrap();
    let source = Arc::new(SlowSource::new(Duration::from_millis(100)));
    let shared = storage();

    let managers: Vec<Arc<TileManager>> = (0..4)
        .map(|_| {
            let locker = FileLocker::new(lock_dir.path(), "osm", DEFAULT_LOCK_TIMEOUT)
                .with_poll_interval(Duration::from_millis(10));
            Arc::new(
                TileManager::builder(Arc::new(TileGrid::global_mercator()), shared.clone())
                    .source(source.clone())
                    .meta_size(2, 2)
                    .locker(Arc::new(locker))
                    .build()
                    .unwrap(),
            )
        })
        .collect();

    let managers = Arc::new(managers);
    let m = managers.clone();
    run_together(4, move |i| {
        m[i].load_tile(TileCoord::new(10, 10, 8)).unwrap();
    });

    assert_eq!(source.calls(), 1);
    // Lock files are removed on release
    assert_eq!(std::fs::read_dir(lock_dir.path()).unwrap().count(), 0);
}

/// A seeding run and interactive clients share renders the same way.
#[test]
fn test_seed_priority_shares_renders_with_clients() {
    let source = Arc::new(SlowSource::new(Duration::from_millis(50)));
    let manager = Arc::new(meta_manager(source.clone(), storage()));

    let m = manager.clone();
    run_together(2, move |i| {
        let priority = if i == 0 {
            RenderPriority::SEED
        } else {
            RenderPriority::INTERACTIVE
        };
        m.load_tiles_with_priority(&[Some(TileCoord::new(1, 1, 4))], priority)
            .unwrap();
    });

    assert_eq!(source.calls(), 1);
}
