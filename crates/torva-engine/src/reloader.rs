//! Startup rehydration of non-terminal torrents from the durable store.

use std::sync::Arc;

use anyhow::{Context, Result};
use torva_data::Store;
use tracing::{info, warn};

use crate::engine::SwarmEngine;

/// Replay every non-terminal record into the engine.
///
/// Runs once, after migrations. Records admitted by magnet are re-added the
/// same way; records without a magnet fall back to their bare infohash.
/// Metadata fetch for not-yet-complete records is armed asynchronously with
/// the usual five-minute deadline, so startup never blocks on the swarm.
///
/// # Errors
///
/// Fails when the store cannot list records; individual engine rejections
/// are logged and skipped.
pub async fn reload_torrents(store: &Store, engine: &Arc<SwarmEngine>) -> Result<usize> {
    let records = store
        .list_resumable_torrents()
        .await
        .context("list resumable torrents")?;

    let mut reloaded = 0usize;
    for record in records {
        match engine.reload(&record).await {
            Ok(true) => reloaded += 1,
            Ok(false) => {}
            Err(err) => {
                warn!(
                    error = %err,
                    info_hash = %record.info_hash,
                    torrent_id = %record.id,
                    "failed to reload torrent"
                );
            }
        }
    }

    if reloaded > 0 {
        info!(count = reloaded, "reloaded torrents from durable store");
    }
    Ok(reloaded)
}
