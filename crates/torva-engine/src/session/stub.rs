//! Scriptable in-memory swarm used by the test suite.
//!
//! Tests inject stats snapshots and signal metadata arrival; the lifecycle
//! core cannot tell the difference from a real engine, which is the point.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, bail};
use async_trait::async_trait;
use tokio::sync::Notify;
use torva_core::swarm::{ReadSeek, SwarmClient, SwarmHandle, SwarmStats};

use super::magnet_info_hash;

/// One scripted torrent inside the stub swarm.
pub struct StubHandle {
    info_hash: String,
    stats: Mutex<SwarmStats>,
    payload: Mutex<HashMap<String, Vec<u8>>>,
    metadata_ready: Notify,
    started: AtomicBool,
    detached: AtomicBool,
    connection_cap: AtomicU32,
}

impl StubHandle {
    /// New handle with empty (metadata-less) stats.
    #[must_use]
    pub fn new(info_hash: &str) -> Self {
        Self {
            info_hash: info_hash.to_ascii_lowercase(),
            stats: Mutex::new(SwarmStats::default()),
            payload: Mutex::new(HashMap::new()),
            metadata_ready: Notify::new(),
            started: AtomicBool::new(false),
            detached: AtomicBool::new(false),
            connection_cap: AtomicU32::new(u32::MAX),
        }
    }

    /// Replace the stats snapshot; wakes metadata waiters when the snapshot
    /// says metadata is present.
    pub fn set_stats(&self, stats: SwarmStats) {
        let has_metadata = stats.has_metadata;
        *lock(&self.stats) = stats;
        if has_metadata {
            self.metadata_ready.notify_waiters();
        }
    }

    /// Register payload bytes served by `open_reader`.
    pub fn set_payload(&self, relative_path: &str, bytes: Vec<u8>) {
        lock(&self.payload).insert(relative_path.to_string(), bytes);
    }

    /// Whether `start_download` has been called.
    #[must_use]
    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Whether the handle has been detached from the swarm.
    #[must_use]
    pub fn detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    /// Last connection cap applied to the handle.
    #[must_use]
    pub fn connection_cap(&self) -> u32 {
        self.connection_cap.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SwarmHandle for StubHandle {
    fn info_hash(&self) -> String {
        self.info_hash.clone()
    }

    fn stats(&self) -> SwarmStats {
        lock(&self.stats).clone()
    }

    async fn await_metadata(&self) -> anyhow::Result<()> {
        loop {
            let notified = self.metadata_ready.notified();
            if lock(&self.stats).has_metadata {
                return Ok(());
            }
            notified.await;
        }
    }

    async fn start_download(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    async fn set_connection_cap(&self, cap: u32) {
        self.connection_cap.store(cap, Ordering::SeqCst);
    }

    async fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }

    fn open_reader(&self, relative_path: &str) -> anyhow::Result<(Box<dyn ReadSeek>, u64)> {
        if !lock(&self.stats).has_metadata {
            bail!("torrent metadata not available");
        }
        let bytes = lock(&self.payload)
            .get(relative_path)
            .cloned()
            .with_context(|| format!("file {relative_path} not found in torrent"))?;
        let length = bytes.len() as u64;
        Ok((Box::new(Cursor::new(bytes)), length))
    }
}

/// In-memory swarm client handing out [`StubHandle`]s.
#[derive(Default)]
pub struct StubSwarm {
    handles: Mutex<HashMap<String, Arc<StubHandle>>>,
}

impl StubSwarm {
    /// Empty stub swarm.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The handle admitted for an infohash, if any.
    #[must_use]
    pub fn handle(&self, info_hash: &str) -> Option<Arc<StubHandle>> {
        lock(&self.handles).get(&info_hash.to_ascii_lowercase()).cloned()
    }

    fn admit(&self, info_hash: &str) -> Arc<StubHandle> {
        let mut handles = lock(&self.handles);
        Arc::clone(
            handles
                .entry(info_hash.to_ascii_lowercase())
                .or_insert_with(|| Arc::new(StubHandle::new(info_hash))),
        )
    }
}

#[async_trait]
impl SwarmClient for StubSwarm {
    async fn add_magnet(&self, uri: &str) -> anyhow::Result<Arc<dyn SwarmHandle>> {
        let info_hash =
            magnet_info_hash(uri).context("magnet URI does not carry a usable infohash")?;
        Ok(self.admit(&info_hash))
    }

    /// The stub convention: metainfo "bytes" are the 40-hex infohash in
    /// ASCII, and admission makes metadata immediately available.
    async fn add_metainfo(&self, bytes: &[u8]) -> anyhow::Result<Arc<dyn SwarmHandle>> {
        let text = std::str::from_utf8(bytes).context("stub metainfo must be ascii")?;
        let info_hash = text.trim().to_ascii_lowercase();
        if info_hash.len() != 40 || !info_hash.chars().all(|c| c.is_ascii_hexdigit()) {
            bail!("stub metainfo must be a 40-hex infohash");
        }
        let handle = self.admit(&info_hash);
        let mut stats = handle.stats();
        stats.has_metadata = true;
        handle.set_stats(stats);
        Ok(handle)
    }

    async fn add_info_hash(&self, info_hash: &str) -> anyhow::Result<Arc<dyn SwarmHandle>> {
        if info_hash.len() != 40 || !info_hash.chars().all(|c| c.is_ascii_hexdigit()) {
            bail!("invalid infohash");
        }
        Ok(self.admit(info_hash))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_magnet_derives_handle_from_infohash() {
        let swarm = StubSwarm::new();
        let hash = "c12fe1c06bb254907e355522a5d7737cf9b6c66b";
        let handle = swarm
            .add_magnet(&format!("magnet:?xt=urn:btih:{hash}"))
            .await
            .expect("admit magnet");
        assert_eq!(handle.info_hash(), hash);
        assert!(swarm.handle(hash).is_some());
    }

    #[tokio::test]
    async fn metainfo_admission_has_metadata_immediately() {
        let swarm = StubSwarm::new();
        let hash = "ab".repeat(20);
        let handle = swarm.add_metainfo(hash.as_bytes()).await.expect("admit metainfo");
        assert!(handle.stats().has_metadata);
    }

    #[tokio::test]
    async fn await_metadata_wakes_on_script() {
        let swarm = StubSwarm::new();
        let hash = "cd".repeat(20);
        let handle = swarm
            .add_magnet(&format!("magnet:?xt=urn:btih:{hash}"))
            .await
            .expect("admit magnet");
        let stub = swarm.handle(&hash).expect("scripted handle");

        let waiter = tokio::spawn(async move { handle.await_metadata().await });
        tokio::task::yield_now().await;
        stub.set_stats(SwarmStats {
            has_metadata: true,
            ..SwarmStats::default()
        });
        waiter
            .await
            .expect("join waiter")
            .expect("metadata resolves");
    }

    #[tokio::test]
    async fn reader_serves_scripted_payload() {
        use std::io::Read;

        let swarm = StubSwarm::new();
        let hash = "ef".repeat(20);
        let handle = swarm.add_metainfo(hash.as_bytes()).await.expect("admit");
        let stub = swarm.handle(&hash).expect("scripted handle");
        stub.set_payload("hello.bin", b"hello world".to_vec());

        let (mut reader, length) = handle.open_reader("hello.bin").expect("open reader");
        assert_eq!(length, 11);
        let mut contents = Vec::new();
        reader.read_to_end(&mut contents).expect("read payload");
        assert_eq!(contents, b"hello world");

        assert!(handle.open_reader("missing.bin").is_err());
    }
}
