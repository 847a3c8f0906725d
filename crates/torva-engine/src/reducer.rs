//! Single-consumer reducer: drains the update channel and serialises every
//! durable commit that originates from engine signals.
//!
//! Store faults are logged and the update is dropped; the next tick rebuilds
//! the same truth from the engine, so a retry costs one second. Completion is
//! committed through the store's `completed_at IS NULL` guard, which makes
//! replayed completion updates degenerate into plain progress writes.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use torva_core::{Plan, StatusUpdate, TorrentStatus};
use torva_data::Store;
use tracing::{info, warn};
use uuid::Uuid;

use crate::packager;

/// Spawn the reducer task over the receiving half of the update channel.
pub fn spawn_reducer(
    store: Store,
    download_dir: PathBuf,
    mut updates: mpsc::Receiver<StatusUpdate>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let reducer = Reducer::new(store, download_dir);
        while let Some(update) = updates.recv().await {
            if let Err(err) = reducer.apply(&update).await {
                warn!(
                    error = %err,
                    torrent_id = %update.id,
                    "failed to commit status update; next tick retries"
                );
            }
        }
    })
}

/// The reducer's durable-commit logic, separated from the task loop for
/// direct use in tests.
pub struct Reducer {
    store: Store,
    download_dir: PathBuf,
    packaging: Arc<Mutex<HashSet<Uuid>>>,
}

impl Reducer {
    /// Build a reducer committing into the given store and packaging into
    /// the given staging directory.
    #[must_use]
    pub fn new(store: Store, download_dir: PathBuf) -> Self {
        Self {
            store,
            download_dir,
            packaging: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Route one update down its commit path.
    ///
    /// # Errors
    ///
    /// Returns an error when the store rejects a write; the caller logs and
    /// drops the update.
    pub async fn apply(&self, update: &StatusUpdate) -> Result<()> {
        if let Some(error) = update.error.as_deref() {
            self.store
                .set_torrent_error(update.id, error)
                .await
                .context("persist error transition")?;
            return Ok(());
        }

        if update.status == TorrentStatus::Completed {
            self.commit_completion(update).await
        } else {
            self.commit_progress(update).await
        }
    }

    async fn commit_progress(&self, update: &StatusUpdate) -> Result<()> {
        self.store
            .update_torrent_progress(
                update.id,
                update.status,
                update.progress.clamp(0.0, 100.0),
                update.downloaded,
                update.uploaded,
                update.download_speed.max(0.0),
                update.upload_speed.max(0.0),
                update.peers,
                update.seeds,
            )
            .await
            .context("persist progress update")?;

        if let Some(name) = update.name.as_deref() {
            self.store
                .update_torrent_metadata(update.id, name, update.total_size)
                .await
                .context("persist torrent metadata")?;
        }
        if !update.files.is_empty() {
            self.store
                .update_torrent_files(update.id, &update.files)
                .await
                .context("persist torrent files")?;
        }
        Ok(())
    }

    async fn commit_completion(&self, update: &StatusUpdate) -> Result<()> {
        let retention_days = self.retention_days_for(update.user_id).await?;
        let first = self
            .store
            .complete_torrent(update.id, retention_days)
            .await
            .context("persist completion transition")?;

        if !first {
            // Replayed completion: progress values only, completed_at and
            // expires_at stay untouched.
            return self.commit_progress(update).await;
        }

        if let Some(name) = update.name.as_deref() {
            self.store
                .update_torrent_metadata(update.id, name, update.total_size)
                .await
                .context("persist completed metadata")?;
        }
        if !update.files.is_empty() {
            self.store
                .update_torrent_files(update.id, &update.files)
                .await
                .context("persist completed files")?;
        }
        if update.files.len() > 1 {
            self.schedule_packaging(update);
        }

        let detail = update.name.clone().unwrap_or_else(|| update.info_hash.clone());
        self.store
            .log_download_completed(update.user_id, update.total_size, &detail)
            .await
            .context("append completion usage row")?;

        info!(
            torrent_id = %update.id,
            name = %detail,
            total_size = update.total_size,
            retention_days,
            "torrent completed"
        );
        Ok(())
    }

    async fn retention_days_for(&self, user_id: Uuid) -> Result<u32> {
        let subscription = self
            .store
            .get_subscription(user_id)
            .await
            .context("load subscription for retention")?;
        Ok(subscription
            .map_or_else(|| Plan::free().retention_days, |sub| sub.retention_days()))
    }

    /// Kick off packaging off the commit path; at most one in-flight
    /// packager per record.
    fn schedule_packaging(&self, update: &StatusUpdate) {
        {
            let mut in_flight = self
                .packaging
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if !in_flight.insert(update.id) {
                return;
            }
        }

        let store = self.store.clone();
        let download_dir = self.download_dir.clone();
        let in_flight = Arc::clone(&self.packaging);
        let id = update.id;
        let name = update.name.clone().unwrap_or_else(|| update.info_hash.clone());
        let files: Vec<String> = update.files.iter().map(|file| file.path.clone()).collect();

        tokio::spawn(async move {
            let archive_name = name.clone();
            let result = tokio::task::spawn_blocking(move || {
                packager::create_archive(&download_dir, &archive_name, &files)
            })
            .await;

            match result {
                Ok(Ok(archive)) => {
                    if let Err(err) = store
                        .update_torrent_zip(id, &archive.file_name, archive.size)
                        .await
                    {
                        warn!(error = %err, torrent_id = %id, "failed to persist archive path");
                    } else {
                        info!(
                            torrent_id = %id,
                            archive = %archive.file_name,
                            size = archive.size,
                            "packaged multi-file torrent"
                        );
                    }
                }
                Ok(Err(err)) => {
                    warn!(error = %err, torrent_id = %id, name = %name, "failed to package torrent");
                }
                Err(err) => {
                    warn!(error = %err, torrent_id = %id, "packager task aborted");
                }
            }

            in_flight
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .remove(&id);
        });
    }
}
