//! Opaque interfaces over the third-party swarm engine.
//!
//! The lifecycle core only ever sees these traits; the concrete engine lives
//! behind an adapter in `torva-engine` so the rest of the workspace stays
//! portable across BitTorrent library choices.

use std::io::{Read, Seek};
use std::sync::Arc;

use async_trait::async_trait;

/// Blocking reader handed out for payload streaming.
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// Per-file view inside a [`SwarmStats`] snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwarmFileStat {
    /// Relative path within the torrent payload.
    pub path: String,
    /// Total length of the file in bytes.
    pub length: u64,
    /// Bytes of this file already downloaded.
    pub completed: u64,
}

/// Non-blocking statistics snapshot for a single swarm participation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwarmStats {
    /// Whether the metainfo is known yet.
    pub has_metadata: bool,
    /// Torrent name from the metainfo, once known.
    pub name: Option<String>,
    /// Total payload size in bytes (0 until metadata arrives).
    pub total_bytes: u64,
    /// Bytes downloaded and verified so far.
    pub completed_bytes: u64,
    /// Currently connected peers.
    pub peers: u32,
    /// Currently connected seeders.
    pub seeds: u32,
    /// Whether the engine reports seeding mode for this torrent.
    pub seeding: bool,
    /// Cumulative payload bytes read from the swarm since admission.
    pub cumulative_read: u64,
    /// Cumulative payload bytes written to the swarm since admission.
    pub cumulative_written: u64,
    /// Per-file progress, empty until metadata arrives.
    pub files: Vec<SwarmFileStat>,
}

/// Handle to a single torrent inside the engine.
///
/// `stats` is contractually non-blocking: the update pipeline calls it once
/// per managed torrent per tick and must never stall the tick on engine I/O.
#[async_trait]
pub trait SwarmHandle: Send + Sync {
    /// 40-hex infohash of the torrent.
    fn info_hash(&self) -> String;

    /// Current statistics snapshot.
    fn stats(&self) -> SwarmStats;

    /// Resolve once the metainfo is available. Cancellation-safe; callers
    /// wrap it in their own deadline.
    async fn await_metadata(&self) -> anyhow::Result<()>;

    /// Mark every piece wanted. Idempotent.
    async fn start_download(&self);

    /// Cap the number of established peer connections. Zero pauses the
    /// torrent; restoring the configured ceiling resumes it.
    async fn set_connection_cap(&self, cap: u32);

    /// Detach from the swarm. Any reader issued against this handle becomes
    /// invalid.
    async fn detach(&self);

    /// Open a reader over one payload file with a large forward read-ahead.
    ///
    /// # Errors
    ///
    /// Fails when metadata is not yet present or the path is unknown.
    fn open_reader(&self, relative_path: &str) -> anyhow::Result<(Box<dyn ReadSeek>, u64)>;
}

/// Factory surface of the engine: admit torrents, hand back handles.
#[async_trait]
pub trait SwarmClient: Send + Sync {
    /// Admit a torrent from a magnet URI. May return before metadata is
    /// known.
    async fn add_magnet(&self, uri: &str) -> anyhow::Result<Arc<dyn SwarmHandle>>;

    /// Admit a torrent from raw `.torrent` metainfo bytes. Metadata is
    /// immediately available on the returned handle.
    async fn add_metainfo(&self, bytes: &[u8]) -> anyhow::Result<Arc<dyn SwarmHandle>>;

    /// Admit a torrent from a bare 40-hex infohash (restart reload path).
    async fn add_info_hash(&self, info_hash: &str) -> anyhow::Result<Arc<dyn SwarmHandle>>;
}
