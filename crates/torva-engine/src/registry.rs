//! In-memory index of live swarm participations, keyed by infohash.
//!
//! The registry is the only shared mutable structure in the core. Readers
//! take the shared latch, writers the exclusive latch, and no guard is ever
//! held across a suspension point. Per-entry tick counters are mutated only
//! by the update pipeline.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use torva_core::swarm::{SwarmHandle, SwarmStats};
use uuid::Uuid;

/// Counters carried between ticks to derive transfer speeds.
#[derive(Debug, Default, Clone, Copy)]
struct TickCounters {
    last_tick_at: Option<Instant>,
    cumulative_read: u64,
    cumulative_written: u64,
}

/// In-memory envelope pairing an engine handle with its durable record id.
pub struct ManagedTorrent {
    /// Durable record identifier.
    pub id: Uuid,
    /// User owning the engine participation (first-arrival on duplicates).
    pub user_id: Uuid,
    /// Opaque engine handle.
    pub handle: Arc<dyn SwarmHandle>,
    /// Admission instant.
    pub added_at: DateTime<Utc>,
    tick: Mutex<TickCounters>,
}

impl ManagedTorrent {
    /// Wrap an engine handle for registry ownership.
    #[must_use]
    pub fn new(id: Uuid, user_id: Uuid, handle: Arc<dyn SwarmHandle>) -> Self {
        Self {
            id,
            user_id,
            handle,
            added_at: Utc::now(),
            tick: Mutex::new(TickCounters::default()),
        }
    }

    /// Transfer speeds in bytes/second since the previous committed tick.
    ///
    /// The first tick after admission reports zero for both directions.
    #[must_use]
    pub fn speeds_since_last_tick(&self, stats: &SwarmStats, now: Instant) -> (f64, f64) {
        let counters = *lock(&self.tick);
        let Some(last_at) = counters.last_tick_at else {
            return (0.0, 0.0);
        };
        let elapsed = now.duration_since(last_at).as_secs_f64();
        if elapsed <= 0.0 {
            return (0.0, 0.0);
        }
        #[allow(clippy::cast_precision_loss)]
        let down = stats.cumulative_read.saturating_sub(counters.cumulative_read) as f64 / elapsed;
        #[allow(clippy::cast_precision_loss)]
        let up =
            stats.cumulative_written.saturating_sub(counters.cumulative_written) as f64 / elapsed;
        (down, up)
    }

    /// Commit the tick's counters after the update has been enqueued.
    pub fn commit_tick(&self, stats: &SwarmStats, now: Instant) {
        let mut counters = lock(&self.tick);
        counters.last_tick_at = Some(now);
        counters.cumulative_read = stats.cumulative_read;
        counters.cumulative_written = stats.cumulative_written;
    }
}

/// Result of a duplicate-aware insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The participation was inserted; the caller's record owns it.
    Inserted,
    /// The infohash was already present; the existing entry wins.
    Exists {
        /// Record id of the existing participation.
        id: Uuid,
        /// User owning the existing participation.
        user_id: Uuid,
    },
}

/// Process-lifetime index `infohash → ManagedTorrent`.
#[derive(Default)]
pub struct Registry {
    inner: RwLock<HashMap<String, Arc<ManagedTorrent>>>,
}

impl Registry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless the infohash is already managed; the tie-break for
    /// duplicate admissions is first-arrival.
    pub fn insert_if_absent(&self, info_hash: &str, managed: Arc<ManagedTorrent>) -> InsertOutcome {
        let mut guard = write(&self.inner);
        if let Some(existing) = guard.get(info_hash) {
            return InsertOutcome::Exists {
                id: existing.id,
                user_id: existing.user_id,
            };
        }
        guard.insert(info_hash.to_string(), managed);
        InsertOutcome::Inserted
    }

    /// Look up a participation by infohash.
    #[must_use]
    pub fn lookup(&self, info_hash: &str) -> Option<Arc<ManagedTorrent>> {
        read(&self.inner).get(info_hash).cloned()
    }

    /// Whether an infohash is currently managed.
    #[must_use]
    pub fn contains(&self, info_hash: &str) -> bool {
        read(&self.inner).contains_key(info_hash)
    }

    /// Remove and return a participation.
    #[must_use]
    pub fn remove(&self, info_hash: &str) -> Option<Arc<ManagedTorrent>> {
        write(&self.inner).remove(info_hash)
    }

    /// Snapshot of every participation; taken under the shared latch and
    /// released before any engine call.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, Arc<ManagedTorrent>)> {
        read(&self.inner)
            .iter()
            .map(|(hash, managed)| (hash.clone(), Arc::clone(managed)))
            .collect()
    }

    /// Snapshot filtered to one user's participations.
    #[must_use]
    pub fn snapshot_for_user(&self, user_id: Uuid) -> Vec<(String, Arc<ManagedTorrent>)> {
        read(&self.inner)
            .iter()
            .filter(|(_, managed)| managed.user_id == user_id)
            .map(|(hash, managed)| (hash.clone(), Arc::clone(managed)))
            .collect()
    }

    /// Number of live participations.
    #[must_use]
    pub fn len(&self) -> usize {
        read(&self.inner).len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        read(&self.inner).is_empty()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::stub::StubHandle;
    use std::time::Duration;

    fn managed(id: Uuid, user_id: Uuid, info_hash: &str) -> Arc<ManagedTorrent> {
        Arc::new(ManagedTorrent::new(
            id,
            user_id,
            Arc::new(StubHandle::new(info_hash)),
        ))
    }

    #[test]
    fn insert_if_absent_reports_first_arrival() {
        let registry = Registry::new();
        let first = Uuid::new_v4();
        let owner = Uuid::new_v4();
        let hash = "aa".repeat(20);

        assert_eq!(
            registry.insert_if_absent(&hash, managed(first, owner, &hash)),
            InsertOutcome::Inserted
        );
        assert_eq!(
            registry.insert_if_absent(&hash, managed(Uuid::new_v4(), Uuid::new_v4(), &hash)),
            InsertOutcome::Exists { id: first, user_id: owner }
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn snapshot_for_user_filters_ownership() {
        let registry = Registry::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let hash_a = "aa".repeat(20);
        let hash_b = "bb".repeat(20);
        registry.insert_if_absent(&hash_a, managed(Uuid::new_v4(), alice, &hash_a));
        registry.insert_if_absent(&hash_b, managed(Uuid::new_v4(), bob, &hash_b));

        let mine = registry.snapshot_for_user(alice);
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].0, hash_a);
        assert_eq!(registry.snapshot().len(), 2);
    }

    #[test]
    fn remove_forgets_the_participation() {
        let registry = Registry::new();
        let hash = "cc".repeat(20);
        registry.insert_if_absent(&hash, managed(Uuid::new_v4(), Uuid::new_v4(), &hash));
        assert!(registry.remove(&hash).is_some());
        assert!(registry.remove(&hash).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn first_tick_reports_zero_speeds() {
        let hash = "dd".repeat(20);
        let entry = managed(Uuid::new_v4(), Uuid::new_v4(), &hash);
        let stats = SwarmStats {
            cumulative_read: 4096,
            cumulative_written: 1024,
            ..SwarmStats::default()
        };
        let now = Instant::now();
        assert_eq!(entry.speeds_since_last_tick(&stats, now), (0.0, 0.0));
        entry.commit_tick(&stats, now);

        let later = now + Duration::from_secs(2);
        let next = SwarmStats {
            cumulative_read: 4096 + 2048,
            cumulative_written: 1024 + 512,
            ..SwarmStats::default()
        };
        let (down, up) = entry.speeds_since_last_tick(&next, later);
        assert!((down - 1024.0).abs() < 1.0);
        assert!((up - 256.0).abs() < 1.0);
    }

    #[test]
    fn counter_reset_never_goes_negative() {
        let hash = "ee".repeat(20);
        let entry = managed(Uuid::new_v4(), Uuid::new_v4(), &hash);
        let now = Instant::now();
        entry.commit_tick(
            &SwarmStats {
                cumulative_read: 10_000,
                ..SwarmStats::default()
            },
            now,
        );
        let (down, _) = entry.speeds_since_last_tick(
            &SwarmStats {
                cumulative_read: 100,
                ..SwarmStats::default()
            },
            now + Duration::from_secs(1),
        );
        assert!(down.abs() < f64::EPSILON);
    }
}
