#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links
)]
#![allow(clippy::module_name_repetitions)]

//! Engine-agnostic torrent domain types and swarm interfaces shared across the
//! Torva workspace.

pub mod fsname;
pub mod model;
pub mod plan;
pub mod swarm;

pub use model::{FilePriority, StatusUpdate, TorrentFile, TorrentRecord, TorrentStatus};
pub use plan::Plan;
pub use swarm::{ReadSeek, SwarmClient, SwarmFileStat, SwarmHandle, SwarmStats};
