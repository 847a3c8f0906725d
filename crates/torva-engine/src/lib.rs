#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links
)]
#![allow(clippy::module_name_repetitions)]

//! Torrent lifecycle core.
//!
//! Owns every live swarm participation from admission through metadata
//! fetch, piece download, completion, packaging, retention, and removal. The
//! update pipeline samples the engine once a second, the reducer serialises
//! durable commits, the reloader replays state after a restart, and the
//! sweeper enforces retention. The underlying BitTorrent client stays behind
//! the [`torva_core::swarm`] traits.

pub mod engine;
pub mod packager;
pub mod registry;
pub mod reducer;
pub mod reloader;
pub mod session;
pub mod sweeper;
pub mod updater;

pub use engine::{AddOutcome, EngineConfig, SwarmEngine, UPDATE_CHANNEL_CAPACITY};
pub use registry::{ManagedTorrent, Registry};
pub use session::DisabledSwarm;
pub use session::stub::StubSwarm;
