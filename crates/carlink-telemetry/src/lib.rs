//! ---
//! carlink_section: "03-telemetry-state"
//! carlink_subsection: "module"
//! carlink_type: "source"
//! carlink_scope: "code"
//! carlink_description: "Process-wide store for the most recent telemetry snapshot."
//! carlink_version: "v0.1.0"
//! carlink_owner: "tbd"
//! ---
#![warn(missing_docs)]

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use carlink_msg::TelemetrySnapshot;
use parking_lot::RwLock;
use tracing::trace;

/// Holds the most recently accepted telemetry snapshot.
///
/// Implementations must hand out whole snapshots only: a reader racing a
/// writer observes either the previous or the next value, never a mix.
pub trait TelemetryCache: Send + Sync + 'static {
    /// Current snapshot, or `None` if nothing was ever stored.
    fn latest(&self) -> Option<Arc<TelemetrySnapshot>>;

    /// Replace the stored snapshot wholesale. Last writer wins.
    fn update(&self, snapshot: TelemetrySnapshot);
}

/// In-process cache backed by a single swappable pointer.
///
/// The lock only guards the `Arc` clone or swap, so it is never held while a
/// caller serialises or sends the snapshot.
#[derive(Default)]
pub struct InMemoryTelemetryCache {
    slot: RwLock<Option<Arc<TelemetrySnapshot>>>,
    updates: AtomicU64,
}

impl InMemoryTelemetryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of accepted updates since construction.
    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }
}

impl TelemetryCache for InMemoryTelemetryCache {
    fn latest(&self) -> Option<Arc<TelemetrySnapshot>> {
        self.slot.read().clone()
    }

    fn update(&self, snapshot: TelemetrySnapshot) {
        let next = Arc::new(snapshot);
        let previous = self.slot.write().replace(next);
        self.updates.fetch_add(1, Ordering::Relaxed);
        trace!(replaced = previous.is_some(), "telemetry cache updated");
    }
}

impl fmt::Debug for InMemoryTelemetryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryTelemetryCache")
            .field("populated", &self.slot.read().is_some())
            .field("updates", &self.update_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn snapshot(battery: f64, rpm: i32) -> TelemetrySnapshot {
        TelemetrySnapshot::new(battery, 1.0, 10.0, rpm)
    }

    #[test]
    fn fresh_cache_is_empty() {
        let cache = InMemoryTelemetryCache::new();
        assert!(cache.latest().is_none());
        assert_eq!(cache.update_count(), 0);
    }

    #[test]
    fn last_write_wins_without_merging() {
        let cache = InMemoryTelemetryCache::new();
        let first = TelemetrySnapshot::new(90.0, 2.5, 40.0, 8000);
        let second = TelemetrySnapshot::new(10.0, 0.0, 0.0, 0);
        cache.update(first);
        cache.update(second.clone());
        assert_eq!(cache.latest().as_deref(), Some(&second));
        assert_eq!(cache.update_count(), 2);
    }

    #[test]
    fn out_of_range_values_are_stored_verbatim() {
        let cache = InMemoryTelemetryCache::new();
        let odd = TelemetrySnapshot::new(150.0, -3.0, 999.0, -1);
        cache.update(odd.clone());
        assert_eq!(cache.latest().as_deref(), Some(&odd));
    }

    #[test]
    fn concurrent_writers_leave_one_whole_snapshot() {
        let cache = Arc::new(InMemoryTelemetryCache::new());
        let writers: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for _ in 0..200 {
                        // battery and rpm are tied so a torn value would be visible
                        cache.update(snapshot(i as f64, i * 1000));
                        let seen = cache.latest().expect("populated");
                        assert_eq!(seen.motor_rpm, seen.battery_level as i32 * 1000);
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let last = cache.latest().expect("populated");
        assert!((0..8).any(|i| last.battery_level == i as f64 && last.motor_rpm == i * 1000));
        assert_eq!(cache.update_count(), 8 * 200);
    }
}
