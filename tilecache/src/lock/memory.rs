//! In-process meta-tile locker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::coord::TileCoord;

use super::{LockError, LockKey, LockRelease, TileLockGuard, TileLocker};

/// Per-key lock state. Waiters park on the condition variable.
#[derive(Debug, Default)]
struct Slot {
    held: Mutex<bool>,
    released: Condvar,
}

type Slots = DashMap<TileCoord, Arc<Slot>>;

/// Locker for the threads of one process.
///
/// Slots exist only while a key is held or waited for; they are removed when
/// the last user releases them.
#[derive(Debug)]
pub struct InProcessLocker {
    cache: Arc<str>,
    timeout: Duration,
    slots: Arc<Slots>,
}

impl InProcessLocker {
    pub fn new(cache: impl Into<Arc<str>>, timeout: Duration) -> Self {
        Self {
            cache: cache.into(),
            timeout,
            slots: Arc::new(DashMap::new()),
        }
    }

    /// Number of keys currently held or waited for.
    pub fn active_keys(&self) -> usize {
        self.slots.len()
    }
}

fn discard_idle(slots: &Slots, coord: &TileCoord) {
    slots.remove_if(coord, |_, slot| {
        Arc::strong_count(slot) == 1 && !*slot.held.lock()
    });
}

struct Held {
    slots: Arc<Slots>,
    coord: TileCoord,
    slot: Arc<Slot>,
}

impl LockRelease for Held {
    fn release(self: Box<Self>) {
        let Held { slots, coord, slot } = *self;
        *slot.held.lock() = false;
        slot.released.notify_one();
        drop(slot);
        discard_idle(&slots, &coord);
    }
}

impl TileLocker for InProcessLocker {
    fn lock(&self, main_tile: TileCoord) -> Result<TileLockGuard, LockError> {
        let key = LockKey::new(self.cache.clone(), main_tile);
        let slot = self.slots.entry(main_tile).or_default().clone();

        let started = Instant::now();
        let deadline = started + self.timeout;
        let acquired = {
            let mut held = slot.held.lock();
            while *held {
                if slot.released.wait_until(&mut held, deadline).timed_out() {
                    break;
                }
            }
            if *held {
                false
            } else {
                *held = true;
                true
            }
        };

        if !acquired {
            drop(slot);
            discard_idle(&self.slots, &main_tile);
            tracing::warn!(key = %key, "Timed out waiting for tile lock");
            return Err(LockError::Timeout {
                key: key.to_string(),
                waited: started.elapsed(),
            });
        }

        tracing::trace!(key = %key, waited_ms = started.elapsed().as_millis() as u64, "Acquired tile lock");
        Ok(TileLockGuard::new(
            key,
            Box::new(Held {
                slots: self.slots.clone(),
                coord: main_tile,
                slot,
            }),
        ))
    }
}
