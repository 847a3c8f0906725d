#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links
)]

//! Binary entrypoint wiring the Torva services together.

use std::process::ExitCode;

/// Boot the service and block until shutdown. Exits non-zero on fatal
/// initialisation failures.
#[tokio::main]
async fn main() -> ExitCode {
    match torva_app::run_app().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("fatal: {err:#}");
            ExitCode::FAILURE
        }
    }
}
