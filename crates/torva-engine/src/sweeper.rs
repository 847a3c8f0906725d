//! Hourly retention sweep: expired torrents are dropped from the engine,
//! their bytes deleted, and their rows removed.
//!
//! Partial failure is tolerated in one direction only: a failed file
//! deletion is logged and the row still goes away (the billing evidence is
//! the row, not the bytes), while a failed row deletion leaves the record
//! for the next sweep.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio::time::{Duration, interval};
use torva_data::Store;
use tracing::{debug, info, warn};

use crate::engine::SwarmEngine;

/// Period of the retention timer.
pub const SWEEP_PERIOD: Duration = Duration::from_secs(60 * 60);

/// Spawn the hourly sweeper task.
pub fn spawn_sweeper(store: Store, engine: Arc<SwarmEngine>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(SWEEP_PERIOD);
        // The first interval tick fires immediately; consume it so sweeps
        // start one period after boot.
        tick.tick().await;
        loop {
            tick.tick().await;
            match sweep_once(&store, &engine).await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "retention sweep finished"),
                Err(err) => warn!(error = %err, "retention sweep failed"),
            }
        }
    })
}

/// One sweep iteration; also the admin force-sweep entry point. Returns how
/// many rows were removed.
///
/// # Errors
///
/// Fails when the expired set cannot be listed.
pub async fn sweep_once(store: &Store, engine: &SwarmEngine) -> Result<usize> {
    let expired = store
        .get_expired_torrents()
        .await
        .context("list expired torrents")?;

    let mut removed = 0usize;
    for torrent in expired {
        info!(
            torrent_id = %torrent.id,
            name = %torrent.name,
            "removing expired torrent"
        );

        if let Err(err) = engine.remove(&torrent.info_hash, true).await {
            // Terminal records have no live participation; nothing to drop.
            debug!(error = %err, info_hash = %torrent.info_hash, "no engine participation to drop");
        }
        engine.delete_archive(&torrent.name);

        match store.delete_torrent(torrent.id).await {
            Ok(()) => removed += 1,
            Err(err) => {
                warn!(error = %err, torrent_id = %torrent.id, "failed to delete expired row");
            }
        }
    }
    Ok(removed)
}
