//! Tracing subscriber installation.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is not provided.
const DEFAULT_LOG_LEVEL: &str = "info";

/// Install the global tracing subscriber.
///
/// Installation is best-effort: a second call (tests, embedded use) leaves
/// the existing subscriber in place.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
