//! Swarm adapter façade: uniform lifecycle over the opaque engine client.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::time::timeout;
use torva_core::fsname::{join_within, sanitize_file_name};
use torva_core::swarm::{ReadSeek, SwarmClient, SwarmHandle};
use torva_core::{StatusUpdate, TorrentRecord, TorrentStatus};
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::registry::{InsertOutcome, ManagedTorrent, Registry};
use crate::updater::build_update;

/// Bound of the status-update channel; sends are non-blocking and drop on
/// full, because every tick rebuilds from engine truth.
pub const UPDATE_CHANNEL_CAPACITY: usize = 100;

/// Absolute deadline for metadata fetch after a magnet admission.
pub const METADATA_DEADLINE: Duration = Duration::from_secs(5 * 60);

/// Tuning applied to the underlying engine and to resume transitions.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Staging area every payload lands in.
    pub download_dir: PathBuf,
    /// Swarm listen port.
    pub listen_port: u16,
    /// Established peer connections allowed per torrent; also the ceiling
    /// restored on resume.
    pub established_conns_per_torrent: u32,
    /// Half-open connection allowance per torrent.
    pub half_open_conns_per_torrent: u32,
    /// Peer-list high water mark.
    pub peers_high_water: u32,
    /// Peer-list low water mark.
    pub peers_low_water: u32,
    /// System-wide concurrency ceiling hint.
    pub max_concurrent_hint: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("./downloads"),
            listen_port: 42069,
            established_conns_per_torrent: 50,
            half_open_conns_per_torrent: 25,
            peers_high_water: 500,
            peers_low_water: 50,
            max_concurrent_hint: 10,
        }
    }
}

/// Result of admitting a torrent.
#[derive(Debug)]
pub enum AddOutcome {
    /// A new participation was created; the update acknowledges admission.
    Added(StatusUpdate),
    /// The infohash is already managed; the existing participation wins.
    Exists {
        /// Record id owning the existing participation.
        id: Uuid,
        /// User owning the existing participation.
        user_id: Uuid,
        /// The colliding infohash.
        info_hash: String,
    },
}

/// Uniform lifecycle façade over the swarm client.
///
/// Owns the registry and the sending half of the update channel; all
/// long-lived tasks (updater, reducer, sweeper) are spawned by the
/// application shell around this object.
pub struct SwarmEngine {
    client: Arc<dyn SwarmClient>,
    registry: Arc<Registry>,
    config: EngineConfig,
    updates: mpsc::Sender<StatusUpdate>,
}

impl SwarmEngine {
    /// Build the engine and the receiving half of the update channel.
    ///
    /// # Errors
    ///
    /// Fails when the staging directory cannot be created.
    pub fn new(
        client: Arc<dyn SwarmClient>,
        config: EngineConfig,
    ) -> Result<(Arc<Self>, mpsc::Receiver<StatusUpdate>)> {
        fs::create_dir_all(&config.download_dir).with_context(|| {
            format!(
                "failed to create download directory {}",
                config.download_dir.display()
            )
        })?;
        let (updates, receiver) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let engine = Arc::new(Self {
            client,
            registry: Arc::new(Registry::new()),
            config,
            updates,
        });
        Ok((engine, receiver))
    }

    /// The registry of live participations.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Engine tuning in effect.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn updates(&self) -> &mpsc::Sender<StatusUpdate> {
        &self.updates
    }

    /// Admit a torrent from a magnet URI. Metadata fetch continues in the
    /// background with a five-minute deadline; on expiry a `failed` update is
    /// synthesised onto the channel.
    ///
    /// # Errors
    ///
    /// Fails when the engine rejects the magnet.
    pub async fn add_magnet(&self, id: Uuid, user_id: Uuid, uri: &str) -> Result<AddOutcome> {
        let handle = self.client.add_magnet(uri).await.context("add magnet")?;
        let info_hash = handle.info_hash();

        let managed = Arc::new(ManagedTorrent::new(id, user_id, Arc::clone(&handle)));
        match self.registry.insert_if_absent(&info_hash, managed) {
            InsertOutcome::Exists { id, user_id } => {
                return Ok(AddOutcome::Exists { id, user_id, info_hash });
            }
            InsertOutcome::Inserted => {}
        }

        handle
            .set_connection_cap(self.config.established_conns_per_torrent)
            .await;
        self.spawn_metadata_wait(id, user_id, info_hash.clone(), handle);

        Ok(AddOutcome::Added(StatusUpdate::bare(
            id,
            user_id,
            info_hash,
            TorrentStatus::Pending,
        )))
    }

    /// Admit a torrent from raw metainfo bytes; metadata is immediately
    /// available, so the download starts before returning.
    ///
    /// # Errors
    ///
    /// Fails when the metainfo cannot be parsed or admitted.
    pub async fn add_metainfo(&self, id: Uuid, user_id: Uuid, bytes: &[u8]) -> Result<AddOutcome> {
        let handle = self
            .client
            .add_metainfo(bytes)
            .await
            .context("add metainfo")?;
        let info_hash = handle.info_hash();

        let managed = Arc::new(ManagedTorrent::new(id, user_id, Arc::clone(&handle)));
        match self.registry.insert_if_absent(&info_hash, managed) {
            InsertOutcome::Exists { id, user_id } => {
                return Ok(AddOutcome::Exists { id, user_id, info_hash });
            }
            InsertOutcome::Inserted => {}
        }

        handle
            .set_connection_cap(self.config.established_conns_per_torrent)
            .await;
        handle.start_download().await;

        let stats = handle.stats();
        let mut update = StatusUpdate::bare(id, user_id, info_hash, TorrentStatus::Downloading);
        update.name.clone_from(&stats.name);
        update.total_size = stats.total_bytes;
        Ok(AddOutcome::Added(update))
    }

    /// Replay a durable record into the engine after a restart. Returns
    /// whether a new participation was created.
    ///
    /// # Errors
    ///
    /// Fails when the engine rejects the magnet or infohash.
    pub async fn reload(&self, record: &TorrentRecord) -> Result<bool> {
        if record.status.is_terminal() {
            return Ok(false);
        }
        if self.registry.contains(&record.info_hash) {
            return Ok(false);
        }

        let handle = match record.magnet_uri.as_deref() {
            Some(magnet) if !magnet.is_empty() => self
                .client
                .add_magnet(magnet)
                .await
                .context("reload magnet")?,
            _ => self
                .client
                .add_info_hash(&record.info_hash)
                .await
                .context("reload infohash")?,
        };

        let info_hash = handle.info_hash();
        let managed = Arc::new(ManagedTorrent::new(record.id, record.user_id, Arc::clone(&handle)));
        if let InsertOutcome::Exists { .. } = self.registry.insert_if_absent(&info_hash, managed) {
            // Another record already reloaded this swarm; nothing to do.
            return Ok(false);
        }

        handle
            .set_connection_cap(self.config.established_conns_per_torrent)
            .await;

        if !matches!(record.status, TorrentStatus::Completed | TorrentStatus::Seeding) {
            self.spawn_metadata_wait(record.id, record.user_id, info_hash, handle);
        }
        Ok(true)
    }

    /// Drop a participation from the swarm, optionally deleting the staged
    /// payload bytes.
    ///
    /// # Errors
    ///
    /// Fails when the infohash is not managed.
    pub async fn remove(&self, info_hash: &str, delete_files: bool) -> Result<()> {
        let managed = self
            .registry
            .remove(info_hash)
            .with_context(|| format!("torrent {info_hash} not managed"))?;

        let stats = managed.handle.stats();
        managed.handle.detach().await;

        if delete_files {
            self.delete_payload_files(stats.files.iter().map(|file| file.path.as_str()));
        }
        info!(info_hash, delete_files, "torrent dropped from engine");
        Ok(())
    }

    /// Pause a participation: zero established peer connections allowed.
    ///
    /// # Errors
    ///
    /// Fails when the infohash is not managed.
    pub async fn pause(&self, info_hash: &str) -> Result<()> {
        let managed = self
            .registry
            .lookup(info_hash)
            .with_context(|| format!("torrent {info_hash} not managed"))?;
        managed.handle.set_connection_cap(0).await;
        Ok(())
    }

    /// Resume a paused participation: restore the configured peer ceiling
    /// and mark every piece wanted again.
    ///
    /// # Errors
    ///
    /// Fails when the infohash is not managed.
    pub async fn resume(&self, info_hash: &str) -> Result<()> {
        let managed = self
            .registry
            .lookup(info_hash)
            .with_context(|| format!("torrent {info_hash} not managed"))?;
        managed
            .handle
            .set_connection_cap(self.config.established_conns_per_torrent)
            .await;
        managed.handle.start_download().await;
        Ok(())
    }

    /// Live status for one participation, if managed.
    #[must_use]
    pub fn status(&self, info_hash: &str) -> Option<StatusUpdate> {
        let managed = self.registry.lookup(info_hash)?;
        Some(build_update(&managed, info_hash))
    }

    /// Live projections for one user's participations.
    #[must_use]
    pub fn snapshots_for_user(&self, user_id: Uuid) -> Vec<StatusUpdate> {
        self.registry
            .snapshot_for_user(user_id)
            .iter()
            .map(|(hash, managed)| build_update(managed, hash))
            .collect()
    }

    /// Live projections for every participation (admin surface).
    #[must_use]
    pub fn all_snapshots(&self) -> Vec<StatusUpdate> {
        self.registry
            .snapshot()
            .iter()
            .map(|(hash, managed)| build_update(managed, hash))
            .collect()
    }

    /// Open a reader over one payload file of a managed torrent.
    ///
    /// # Errors
    ///
    /// Fails when the infohash is not managed, metadata is missing, or the
    /// path is unknown.
    pub fn open_reader(
        &self,
        info_hash: &str,
        relative_path: &str,
    ) -> Result<(Box<dyn ReadSeek>, u64)> {
        let managed = self
            .registry
            .lookup(info_hash)
            .with_context(|| format!("torrent {info_hash} not managed"))?;
        managed.handle.open_reader(relative_path)
    }

    /// Delete a packaged archive for the given torrent name, if one exists.
    pub fn delete_archive(&self, torrent_name: &str) {
        let archive = self
            .config
            .download_dir
            .join(format!("{}.zip", sanitize_file_name(torrent_name)));
        match fs::remove_file(&archive) {
            Ok(()) => debug!(path = %archive.display(), "removed packaged archive"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(error = %err, path = %archive.display(), "failed to remove archive"),
        }
    }

    fn delete_payload_files<'a>(&self, paths: impl Iterator<Item = &'a str>) {
        let mut roots: Vec<PathBuf> = Vec::new();
        for relative in paths {
            let Some(full) = join_within(&self.config.download_dir, relative) else {
                warn!(path = relative, "refusing to delete path outside the download root");
                continue;
            };
            if let Err(err) = fs::remove_file(&full) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(error = %err, path = %full.display(), "failed to delete payload file");
                }
            }
            if let Some(root) = payload_root(&self.config.download_dir, relative) {
                if !roots.contains(&root) {
                    roots.push(root);
                }
            }
        }
        for root in roots {
            prune_empty_dirs(&root);
        }
    }

    fn spawn_metadata_wait(
        &self,
        id: Uuid,
        user_id: Uuid,
        info_hash: String,
        handle: Arc<dyn SwarmHandle>,
    ) {
        let updates = self.updates.clone();
        tokio::spawn(async move {
            match timeout(METADATA_DEADLINE, handle.await_metadata()).await {
                Ok(Ok(())) => {
                    handle.start_download().await;
                    let stats = handle.stats();
                    let mut update =
                        StatusUpdate::bare(id, user_id, info_hash, TorrentStatus::Downloading);
                    update.name.clone_from(&stats.name);
                    update.total_size = stats.total_bytes;
                    if updates.try_send(update).is_err() {
                        debug!(torrent_id = %id, "update channel full; metadata snapshot dropped");
                    }
                }
                Ok(Err(err)) => {
                    warn!(error = %err, torrent_id = %id, "metadata fetch failed");
                    let update = StatusUpdate::failed(id, user_id, info_hash, err.to_string());
                    let _ = updates.try_send(update);
                }
                Err(_) => {
                    warn!(torrent_id = %id, "timed out waiting for torrent metadata");
                    let update = StatusUpdate::failed(
                        id,
                        user_id,
                        info_hash,
                        "timeout waiting for torrent metadata",
                    );
                    let _ = updates.try_send(update);
                }
            }
        });
    }
}

/// Top-level directory a payload file lives under, when it has one.
fn payload_root(download_dir: &Path, relative: &str) -> Option<PathBuf> {
    let first = Path::new(relative).components().next()?;
    let root = download_dir.join(first);
    (root != *download_dir && Path::new(relative).components().count() > 1).then_some(root)
}

/// Remove now-empty directories bottom-up under `root`, then `root` itself.
fn prune_empty_dirs(root: &Path) {
    if !root.is_dir() {
        return;
    }
    let mut dirs: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.path().to_path_buf())
        .collect();
    dirs.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));
    for dir in dirs {
        // Fails while non-empty, which is exactly the behaviour we want.
        let _ = fs::remove_dir(&dir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_match_tuning_baseline() {
        let config = EngineConfig::default();
        assert_eq!(config.established_conns_per_torrent, 50);
        assert_eq!(config.half_open_conns_per_torrent, 25);
        assert_eq!(config.peers_high_water, 500);
        assert_eq!(config.peers_low_water, 50);
        assert_eq!(config.listen_port, 42069);
    }

    #[test]
    fn payload_root_requires_a_directory_component() {
        let dir = Path::new("/srv/dl");
        assert_eq!(payload_root(dir, "show/e01.mkv"), Some(dir.join("show")));
        assert_eq!(payload_root(dir, "single.bin"), None);
    }
}
