//! Tick-driven update pipeline.
//!
//! Once a second the updater walks the registry under the shared latch,
//! derives a [`StatusUpdate`] for every managed torrent from the engine's
//! non-blocking stats, and offers it to the bounded channel. Sends never
//! block: a full channel drops the tick, and the next tick rebuilds the same
//! truth from the engine. Tick counters are committed only after the enqueue
//! attempt.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};
use torva_core::model::percent_complete;
use torva_core::swarm::SwarmStats;
use torva_core::{StatusUpdate, TorrentFile, TorrentStatus};
use tracing::debug;

use crate::engine::SwarmEngine;
use crate::registry::ManagedTorrent;

/// Nominal tick period of the update pipeline.
pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Spawn the 1 Hz updater task.
pub fn spawn_updater(engine: Arc<SwarmEngine>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(TICK_PERIOD);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            run_tick(&engine);
        }
    })
}

/// One updater iteration: derive, offer, commit. Exposed for tests.
pub fn run_tick(engine: &SwarmEngine) {
    for (info_hash, managed) in engine.registry().snapshot() {
        let stats = managed.handle.stats();
        let now = Instant::now();
        let update = build_update_at(&managed, &info_hash, &stats, now);
        if engine.updates().try_send(update).is_err() {
            debug!(info_hash, "update channel full; dropping tick");
        }
        managed.commit_tick(&stats, now);
    }
}

/// Build a status update from a fresh stats snapshot without committing the
/// tick counters.
#[must_use]
pub(crate) fn build_update(managed: &ManagedTorrent, info_hash: &str) -> StatusUpdate {
    let stats = managed.handle.stats();
    build_update_at(managed, info_hash, &stats, Instant::now())
}

fn build_update_at(
    managed: &ManagedTorrent,
    info_hash: &str,
    stats: &SwarmStats,
    now: Instant,
) -> StatusUpdate {
    let mut update = StatusUpdate::bare(
        managed.id,
        managed.user_id,
        info_hash,
        derive_status(stats),
    );

    if !stats.has_metadata {
        return update;
    }

    let (download_speed, upload_speed) = managed.speeds_since_last_tick(stats, now);
    update.name.clone_from(&stats.name);
    update.total_size = stats.total_bytes;
    update.downloaded = stats.completed_bytes;
    update.uploaded = stats.cumulative_written;
    update.download_speed = download_speed;
    update.upload_speed = upload_speed;
    update.peers = stats.peers;
    update.seeds = stats.seeds;
    update.progress = percent_complete(stats.completed_bytes, stats.total_bytes);
    update.files = stats
        .files
        .iter()
        .map(|file| TorrentFile {
            path: file.path.clone(),
            size: file.length,
            progress: percent_complete(file.completed, file.length),
            priority: torva_core::FilePriority::Normal,
        })
        .collect();
    update
}

/// Status ladder, evaluated in order: missing metadata, completion, seeding
/// mode, connected peers, stalled.
pub(crate) fn derive_status(stats: &SwarmStats) -> TorrentStatus {
    if !stats.has_metadata {
        TorrentStatus::Pending
    } else if stats.total_bytes > 0 && stats.completed_bytes >= stats.total_bytes {
        TorrentStatus::Completed
    } else if stats.seeding {
        TorrentStatus::Seeding
    } else if stats.peers > 0 {
        TorrentStatus::Downloading
    } else {
        TorrentStatus::Stalled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use torva_core::swarm::SwarmFileStat;

    fn stats(has_metadata: bool) -> SwarmStats {
        SwarmStats {
            has_metadata,
            name: has_metadata.then(|| "payload".to_string()),
            total_bytes: 1000,
            completed_bytes: 250,
            peers: 3,
            seeds: 1,
            ..SwarmStats::default()
        }
    }

    #[test]
    fn status_ladder_order() {
        assert_eq!(derive_status(&stats(false)), TorrentStatus::Pending);

        let mut done = stats(true);
        done.completed_bytes = 1000;
        assert_eq!(derive_status(&done), TorrentStatus::Completed);

        let mut seeding = stats(true);
        seeding.seeding = true;
        assert_eq!(derive_status(&seeding), TorrentStatus::Seeding);

        assert_eq!(derive_status(&stats(true)), TorrentStatus::Downloading);

        let mut idle = stats(true);
        idle.peers = 0;
        assert_eq!(derive_status(&idle), TorrentStatus::Stalled);
    }

    #[test]
    fn completion_requires_known_total() {
        let mut empty = stats(true);
        empty.total_bytes = 0;
        empty.completed_bytes = 0;
        empty.peers = 0;
        assert_eq!(derive_status(&empty), TorrentStatus::Stalled);
    }

    #[test]
    fn update_rebuilds_file_progress_each_tick() {
        use crate::session::stub::StubHandle;
        use uuid::Uuid;

        let handle = Arc::new(StubHandle::new(&"ab".repeat(20)));
        let mut snapshot = stats(true);
        snapshot.files = vec![
            SwarmFileStat {
                path: "a.txt".to_string(),
                length: 100,
                completed: 50,
            },
            SwarmFileStat {
                path: "b.txt".to_string(),
                length: 200,
                completed: 200,
            },
        ];
        handle.set_stats(snapshot);
        let managed = ManagedTorrent::new(Uuid::new_v4(), Uuid::new_v4(), handle);
        let update = build_update(&managed, &"ab".repeat(20));

        assert_eq!(update.files.len(), 2);
        assert!((update.files[0].progress - 50.0).abs() < f64::EPSILON);
        assert!((update.files[1].progress - 100.0).abs() < f64::EPSILON);
        assert!((update.progress - 25.0).abs() < f64::EPSILON);
        assert_eq!(update.name.as_deref(), Some("payload"));
    }

    #[test]
    fn pending_update_stays_bare() {
        use crate::session::stub::StubHandle;
        use uuid::Uuid;

        let handle = Arc::new(StubHandle::new(&"cd".repeat(20)));
        let managed = ManagedTorrent::new(Uuid::new_v4(), Uuid::new_v4(), handle);
        let update = build_update(&managed, &"cd".repeat(20));
        assert_eq!(update.status, TorrentStatus::Pending);
        assert!(update.files.is_empty());
        assert!(update.name.is_none());
        assert_eq!(update.total_size, 0);
    }
}
