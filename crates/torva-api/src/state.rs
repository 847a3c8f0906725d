//! Shared application state handed to every handler.

use std::sync::Arc;
use std::time::Duration;

use torva_data::Store;
use torva_engine::SwarmEngine;

use crate::auth::AuthService;
use crate::rate_limit::RateLimiter;

/// Requests allowed per identity per window.
pub const RATE_LIMIT_PER_WINDOW: u32 = 100;
/// Fixed rate-limit window.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Process-lifetime dependencies for the HTTP surface.
///
/// Created once at startup and torn down on shutdown; handlers receive it
/// through axum state rather than globals.
pub struct ApiState {
    /// Durable store.
    pub store: Store,
    /// Torrent lifecycle core.
    pub engine: Arc<SwarmEngine>,
    /// Token issuance and validation.
    pub auth: AuthService,
    /// Fixed-window request limiter.
    pub limiter: Arc<RateLimiter>,
    /// Outbound HTTP client for server-side `.torrent` fetches.
    pub http: reqwest::Client,
    /// Whether the payment collaborator is wired up.
    pub billing_configured: bool,
}

/// Handler-facing alias.
pub type SharedState = Arc<ApiState>;

impl ApiState {
    /// Assemble shared state; the rate limiter's cleanup task is spawned by
    /// the caller alongside the other background tasks.
    #[must_use]
    pub fn new(store: Store, engine: Arc<SwarmEngine>, auth: AuthService) -> SharedState {
        Arc::new(Self {
            store,
            engine,
            auth,
            limiter: Arc::new(RateLimiter::new(RATE_LIMIT_PER_WINDOW, RATE_LIMIT_WINDOW)),
            http: reqwest::Client::new(),
            billing_configured: false,
        })
    }
}
