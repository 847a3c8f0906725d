#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links
)]
#![allow(clippy::module_name_repetitions)]

//! HTTP surface for Torva.
//!
//! Routes live under `/api/v1`: auth, torrent lifecycle, tokenised public
//! downloads with range support, per-user and admin SSE streams, and the
//! admin surface. Handlers receive shared state explicitly; nothing reaches
//! for globals.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod router;
pub mod state;

pub use auth::AuthService;
pub use error::ApiError;
pub use router::ApiServer;
pub use state::{ApiState, SharedState};
