#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links
)]
#![allow(clippy::module_name_repetitions)]

//! PostgreSQL persistence layer for Torva: migrations and repositories for
//! users, subscriptions, torrents, download tokens, usage logs, and refresh
//! tokens.

pub mod error;
mod store;
mod tokens;
mod torrents;
mod usage;
mod users;

pub use error::{DataError, Result as DataResult};
pub use store::Store;
pub use tokens::DownloadTokenRecord;
pub use torrents::{ExpiredTorrent, NewTorrent};
pub use users::{SubscriptionRecord, UserRecord};
