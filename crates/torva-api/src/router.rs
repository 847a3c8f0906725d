//! Router construction and server host for the API.

use std::net::SocketAddr;

use anyhow::Result;
use axum::extract::DefaultBodyLimit;
use axum::http::Method;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::routing::{delete, get, post};
use axum::{Json, Router, middleware};
use chrono::Utc;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::{require_admin, require_auth};
use crate::handlers::{admin, auth, billing, download, sse, torrents};
use crate::rate_limit::rate_limit_middleware;
use crate::state::SharedState;

/// Uploads above this limit are rejected with 413.
pub const BODY_LIMIT_BYTES: usize = 50 * 1024 * 1024;

/// Axum router wrapper hosting the Torva API.
pub struct ApiServer {
    router: Router,
}

impl ApiServer {
    /// Build the full route tree around shared state.
    #[must_use]
    pub fn new(state: SharedState) -> Self {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([CONTENT_TYPE, AUTHORIZATION]);

        let router = Router::new()
            .route("/health", get(health))
            .nest("/api/v1", Self::v1_routes(&state))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
                    .layer(RequestBodyLimitLayer::new(BODY_LIMIT_BYTES))
                    .layer(cors),
            )
            .with_state(state);

        Self { router }
    }

    fn v1_routes(state: &SharedState) -> Router<SharedState> {
        Self::public_routes(state).merge(Self::protected_routes(state))
    }

    /// Routes that authenticate themselves (or not at all): account
    /// lifecycle, the token-authenticated download, and the SSE endpoints,
    /// which accept the bearer token via query parameter for `EventSource`.
    fn public_routes(state: &SharedState) -> Router<SharedState> {
        Router::new()
            .route("/auth/register", post(auth::register))
            .route("/auth/login", post(auth::login))
            .route("/auth/refresh", post(auth::refresh))
            .route("/auth/logout", post(auth::logout))
            .route("/download/{token}", get(download::download))
            .route("/events", get(sse::events))
            .route("/admin/events", get(sse::admin_events))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                rate_limit_middleware,
            ))
    }

    fn protected_routes(state: &SharedState) -> Router<SharedState> {
        let admin_routes = Router::new()
            .route("/admin/users", get(admin::list_users))
            .route(
                "/admin/users/{id}",
                get(admin::get_user)
                    .patch(admin::update_user)
                    .delete(admin::delete_user),
            )
            .route("/admin/torrents", get(admin::list_all_torrents))
            .route("/admin/torrents/{id}", delete(admin::delete_any_torrent))
            .route("/admin/stats", get(admin::stats))
            .route("/admin/cleanup", post(admin::cleanup))
            .route_layer(middleware::from_fn(require_admin));

        Router::new()
            .route("/auth/me", get(auth::me))
            .route("/torrents", post(torrents::add_torrent).get(torrents::list_torrents))
            .route("/torrents/upload", post(torrents::upload_torrent))
            .route(
                "/torrents/{id}",
                get(torrents::get_torrent).delete(torrents::delete_torrent),
            )
            .route("/torrents/{id}/pause", post(torrents::pause_torrent))
            .route("/torrents/{id}/resume", post(torrents::resume_torrent))
            .route("/torrents/{id}/token", post(torrents::create_download_token))
            .route("/subscription", get(billing::get_subscription))
            .route("/subscription/checkout", post(billing::create_checkout))
            .route("/subscription/portal", post(billing::create_portal))
            .merge(admin_routes)
            // Rate limiting keys on the identity the auth middleware
            // extracts, so auth is the outer layer of the pair.
            .layer(middleware::from_fn_with_state(
                state.clone(),
                rate_limit_middleware,
            ))
            .layer(middleware::from_fn_with_state(state.clone(), require_auth))
    }

    /// Bind and serve until the shutdown future resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener fails to bind or the server
    /// terminates unexpectedly.
    pub async fn serve<F>(self, addr: SocketAddr, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!(%addr, "starting API listener");
        let listener = TcpListener::bind(addr).await?;
        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;
        Ok(())
    }
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "torva",
        "time": Utc::now().to_rfc3339(),
    }))
}
