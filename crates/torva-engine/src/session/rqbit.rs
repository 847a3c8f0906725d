//! librqbit-backed swarm client (cargo feature `rqbit`).
//!
//! The adapter keeps to librqbit's public `Api` surface: torrents are
//! admitted through the session, then driven and observed by id. librqbit
//! exposes pause/resume rather than a per-torrent connection ceiling, so a
//! zero connection cap maps to pause and any non-zero cap to resume.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use librqbit::api::{Api, TorrentIdOrHash};
use librqbit::{AddTorrent, AddTorrentOptions, AddTorrentResponse, Session};
use torva_core::fsname::join_within;
use torva_core::swarm::{ReadSeek, SwarmClient, SwarmFileStat, SwarmHandle, SwarmStats};
use tracing::debug;

use crate::engine::EngineConfig;

/// Swarm client over a librqbit session.
pub struct RqbitSwarm {
    session: Arc<Session>,
    api: Api,
    download_dir: PathBuf,
}

impl RqbitSwarm {
    /// Create a session rooted at the configured download directory.
    ///
    /// # Errors
    ///
    /// Fails when the session cannot be created.
    pub async fn new(config: &EngineConfig) -> Result<Self> {
        let session = Session::new(config.download_dir.clone())
            .await
            .context("create librqbit session")?;
        let api = Api::new(session.clone(), None);
        Ok(Self {
            session,
            api,
            download_dir: config.download_dir.clone(),
        })
    }

    async fn admit(&self, source: AddTorrent<'_>) -> Result<Arc<dyn SwarmHandle>> {
        let options = AddTorrentOptions {
            overwrite: true,
            output_folder: Some(self.download_dir.to_string_lossy().to_string()),
            ..Default::default()
        };
        let response = self
            .session
            .add_torrent(source, Some(options))
            .await
            .context("session add_torrent")?;

        let (id, handle) = match response {
            AddTorrentResponse::Added(id, handle)
            | AddTorrentResponse::AlreadyManaged(id, handle) => (id, handle),
            AddTorrentResponse::ListOnly(_) => {
                bail!("unexpected list-only response from librqbit")
            }
        };

        let info_hash = handle.info_hash().as_string().to_ascii_lowercase();
        debug!(info_hash, id, "torrent admitted to librqbit session");
        Ok(Arc::new(RqbitHandle {
            api: self.api.clone(),
            id,
            info_hash,
            download_dir: self.download_dir.clone(),
            handle,
        }))
    }
}

#[async_trait]
impl SwarmClient for RqbitSwarm {
    async fn add_magnet(&self, uri: &str) -> Result<Arc<dyn SwarmHandle>> {
        self.admit(AddTorrent::from_url(uri)).await
    }

    async fn add_metainfo(&self, bytes: &[u8]) -> Result<Arc<dyn SwarmHandle>> {
        self.admit(AddTorrent::from_bytes(bytes.to_vec())).await
    }

    async fn add_info_hash(&self, info_hash: &str) -> Result<Arc<dyn SwarmHandle>> {
        let magnet = format!("magnet:?xt=urn:btih:{info_hash}");
        self.admit(AddTorrent::from_url(&magnet)).await
    }
}

struct RqbitHandle {
    api: Api,
    id: usize,
    info_hash: String,
    download_dir: PathBuf,
    handle: librqbit::ManagedTorrentHandle,
}

impl RqbitHandle {
    fn target(&self) -> TorrentIdOrHash {
        self.id.into()
    }
}

#[async_trait]
impl SwarmHandle for RqbitHandle {
    fn info_hash(&self) -> String {
        self.info_hash.clone()
    }

    fn stats(&self) -> SwarmStats {
        let Ok(stats) = self.api.api_stats_v1(self.target()) else {
            return SwarmStats::default();
        };

        let mut snapshot = SwarmStats {
            total_bytes: stats.total_bytes,
            completed_bytes: stats.progress_bytes,
            cumulative_written: stats.uploaded_bytes,
            seeding: stats.finished,
            ..SwarmStats::default()
        };

        if let Some(live) = stats.live.as_ref() {
            snapshot.peers = u32::try_from(live.snapshot.peer_stats.live).unwrap_or(u32::MAX);
            // librqbit does not expose a seeder count distinct from peers.
            snapshot.cumulative_read = live.snapshot.fetched_bytes;
        }

        if let Ok(details) = self.api.api_torrent_details(self.target()) {
            snapshot.has_metadata = true;
            snapshot.name = details.name;
            if let Some(files) = details.files {
                snapshot.files = files
                    .iter()
                    .enumerate()
                    .map(|(index, file)| SwarmFileStat {
                        path: if file.components.is_empty() {
                            file.name.clone()
                        } else {
                            file.components.join("/")
                        },
                        length: u64::try_from(file.length).unwrap_or_default(),
                        completed: stats.file_progress.get(index).copied().unwrap_or(0),
                    })
                    .collect();
            }
        }

        snapshot
    }

    async fn await_metadata(&self) -> Result<()> {
        self.handle
            .wait_until_initialized()
            .await
            .context("wait for torrent metadata")
    }

    async fn start_download(&self) {
        if let Err(err) = self.api.api_torrent_action_start(self.target()).await {
            debug!(error = %err, info_hash = %self.info_hash, "start action rejected");
        }
    }

    async fn set_connection_cap(&self, cap: u32) {
        let result = if cap == 0 {
            self.api.api_torrent_action_pause(self.target()).await
        } else {
            self.api.api_torrent_action_start(self.target()).await
        };
        if let Err(err) = result {
            debug!(error = %err, info_hash = %self.info_hash, cap, "connection cap action rejected");
        }
    }

    async fn detach(&self) {
        // Payload deletion is owned by the lifecycle core; forget keeps the
        // staged files in place.
        if let Err(err) = self.api.api_torrent_action_forget(self.target()).await {
            debug!(error = %err, info_hash = %self.info_hash, "forget action rejected");
        }
    }

    fn open_reader(&self, relative_path: &str) -> Result<(Box<dyn ReadSeek>, u64)> {
        let full = join_within(&self.download_dir, relative_path)
            .with_context(|| format!("path {relative_path} escapes the download root"))?;
        let file = File::open(&full)
            .with_context(|| format!("failed to open staged file {}", full.display()))?;
        let length = file
            .metadata()
            .with_context(|| format!("failed to stat staged file {}", full.display()))?
            .len();
        Ok((Box::new(file), length))
    }
}
