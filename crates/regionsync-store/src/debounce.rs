//! Debounce scheduler: coalesces rapid writes per region.
//!
//! Each region key owns at most one slot: the payload waiting to be
//! persisted and the handle of the timer task that will persist it. A new
//! payload for the same key merges into the waiting one and restarts the
//! timer, so a drag produces one write carrying the last intended state.
//!
//! Slots are keyed by region, not captured in closures. Cancelling or
//! taking a slot aborts its timer, so removed regions leave nothing behind.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use regionsync_core::RegionPatch;

/// Identifies one region within one layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegionKey {
    pub layout_id: String,
    pub region_id: String,
}

impl RegionKey {
    pub fn new(layout_id: &str, region_id: &str) -> Self {
        Self {
            layout_id: layout_id.to_string(),
            region_id: region_id.to_string(),
        }
    }
}

impl fmt::Display for RegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.layout_id, self.region_id)
    }
}

/// Payloads that can absorb a newer payload for the same key.
pub trait Coalesce {
    fn coalesce(&mut self, newer: Self);
}

impl Coalesce for RegionPatch {
    fn coalesce(&mut self, newer: Self) {
        self.merge(newer);
    }
}

/// A waiting payload and the timer that will flush it.
struct Slot<P> {
    payload: P,
    /// Distinguishes this timer from one it replaced.
    generation: u64,
    handle: JoinHandle<()>,
}

type SlotMap<P> = Arc<Mutex<HashMap<RegionKey, Slot<P>>>>;

/// Per-key trailing-edge debounce.
pub struct DebounceScheduler<P> {
    window: Duration,
    slots: SlotMap<P>,
    next_generation: AtomicU64,
}

impl<P> DebounceScheduler<P>
where
    P: Coalesce + Send + 'static,
{
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<RegionKey, Slot<P>>> {
        lock_slots(&self.slots)
    }

    /// Schedule `payload` for `key`, merging it into any waiting payload.
    ///
    /// When the window passes without another call for `key`, `fire` runs
    /// with the coalesced payload. A `fire` that has started is never
    /// cancelled; payloads scheduled meanwhile start a new cycle.
    pub fn schedule<F, Fut>(&self, key: RegionKey, payload: P, fire: F)
    where
        F: FnOnce(P) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut slots = self.slots();

        let payload = match slots.remove(&key) {
            Some(previous) => {
                previous.handle.abort();
                let mut merged = previous.payload;
                merged.coalesce(payload);
                merged
            }
            None => payload,
        };

        let window = self.window;
        let slot_map = Arc::clone(&self.slots);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let due = {
                let mut slots = lock_slots(&slot_map);
                match slots.get(&task_key) {
                    Some(slot) if slot.generation == generation => {
                        slots.remove(&task_key).map(|slot| slot.payload)
                    }
                    _ => None,
                }
            };
            if let Some(payload) = due {
                debug!(key = %task_key, "debounce window elapsed; flushing");
                fire(payload).await;
            }
        });

        slots.insert(
            key,
            Slot {
                payload,
                generation,
                handle,
            },
        );
    }

    /// Cancel the timer for `key` and hand back its waiting payload.
    pub fn take(&self, key: &RegionKey) -> Option<P> {
        let slot = self.slots().remove(key)?;
        slot.handle.abort();
        Some(slot.payload)
    }

    /// Cancel every timer of a layout and hand back the waiting payloads.
    pub fn take_layout(&self, layout_id: &str) -> Vec<(RegionKey, P)> {
        let mut slots = self.slots();
        let keys: Vec<RegionKey> = slots
            .keys()
            .filter(|key| key.layout_id == layout_id)
            .cloned()
            .collect();

        keys.into_iter()
            .filter_map(|key| {
                let slot = slots.remove(&key)?;
                slot.handle.abort();
                Some((key, slot.payload))
            })
            .collect()
    }

    /// Drop every waiting payload without persisting it.
    pub fn cancel_all(&self) -> usize {
        let mut slots = self.slots();
        let count = slots.len();
        for (key, slot) in slots.drain() {
            slot.handle.abort();
            debug!(%key, "debounced write cancelled");
        }
        count
    }

    pub fn is_pending(&self, key: &RegionKey) -> bool {
        self.slots().contains_key(key)
    }

    /// Number of waiting payloads for a layout.
    pub fn pending_for_layout(&self, layout_id: &str) -> usize {
        self.slots()
            .keys()
            .filter(|key| key.layout_id == layout_id)
            .count()
    }

    /// Layouts with at least one waiting payload.
    pub fn layouts(&self) -> Vec<String> {
        let mut layouts: Vec<String> = self
            .slots()
            .keys()
            .map(|key| key.layout_id.clone())
            .collect();
        layouts.sort();
        layouts.dedup();
        layouts
    }
}

fn lock_slots<P>(
    slots: &Mutex<HashMap<RegionKey, Slot<P>>>,
) -> MutexGuard<'_, HashMap<RegionKey, Slot<P>>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}
