#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links
)]
#![allow(clippy::module_name_repetitions)]

//! Application shell: configuration, bootstrap, and shutdown for the Torva
//! service.

mod bootstrap;
pub mod config;
pub mod error;
mod seed;
mod telemetry;

pub use bootstrap::run_app;
pub use config::Config;
pub use error::{AppError, AppResult};
