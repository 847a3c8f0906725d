//! Concrete swarm-client implementations.
//!
//! `StubSwarm` drives the test suite, `DisabledSwarm` stands in when no
//! native engine feature is compiled, and `RqbitSwarm` (feature `rqbit`)
//! adapts the librqbit session.

use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use torva_core::swarm::{SwarmClient, SwarmHandle};

#[cfg(feature = "rqbit")]
pub mod rqbit;
pub mod stub;

/// Extract a 40-hex infohash from a magnet URI.
#[must_use]
pub fn magnet_info_hash(uri: &str) -> Option<String> {
    let position = uri.find("xt=urn:btih:")?;
    let after = &uri[position + "xt=urn:btih:".len()..];
    let end = after.find('&').unwrap_or(after.len());
    let hash = after[..end].trim();
    (hash.len() == 40 && hash.chars().all(|c| c.is_ascii_hexdigit()))
        .then(|| hash.to_ascii_lowercase())
}

/// Placeholder client used when the crate is built without a native engine
/// feature; every admission fails with a clear message.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledSwarm;

#[async_trait]
impl SwarmClient for DisabledSwarm {
    async fn add_magnet(&self, _uri: &str) -> anyhow::Result<Arc<dyn SwarmHandle>> {
        bail!("swarm engine support not compiled in; rebuild with the `rqbit` feature")
    }

    async fn add_metainfo(&self, _bytes: &[u8]) -> anyhow::Result<Arc<dyn SwarmHandle>> {
        bail!("swarm engine support not compiled in; rebuild with the `rqbit` feature")
    }

    async fn add_info_hash(&self, _info_hash: &str) -> anyhow::Result<Arc<dyn SwarmHandle>> {
        bail!("swarm engine support not compiled in; rebuild with the `rqbit` feature")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magnet_info_hash_extracts_lowercased_hex() {
        let hash = "C12FE1C06BB254907E355522A5D7737CF9B6C66B";
        let uri = format!("magnet:?xt=urn:btih:{hash}&dn=demo&tr=udp://tracker");
        assert_eq!(magnet_info_hash(&uri), Some(hash.to_ascii_lowercase()));
    }

    #[test]
    fn magnet_info_hash_rejects_malformed_input() {
        assert_eq!(magnet_info_hash("magnet:?dn=no-hash"), None);
        assert_eq!(magnet_info_hash("magnet:?xt=urn:btih:tooshort"), None);
        assert_eq!(magnet_info_hash("not a magnet at all"), None);
    }

    #[tokio::test]
    async fn disabled_swarm_rejects_everything() {
        let client = DisabledSwarm;
        assert!(client.add_magnet("magnet:?xt=urn:btih:aa").await.is_err());
        assert!(client.add_metainfo(&[1, 2, 3]).await.is_err());
        assert!(client.add_info_hash("aa").await.is_err());
    }
}
