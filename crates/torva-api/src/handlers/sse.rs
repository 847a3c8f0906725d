//! Server-sent-events streams pushing per-user status projections.
//!
//! Browsers' `EventSource` cannot set headers, so the endpoints accept the
//! bearer token in either the `Authorization` header or a `token=` query
//! parameter. Streams are capped at thirty minutes; clients reconnect.

use std::convert::Infallible;
use std::time::{Duration, Instant};

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::response::sse::{Event, Sse};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio::time::{MissedTickBehavior, interval};
use tokio_stream::StreamExt as _;
use uuid::Uuid;

use crate::auth::{bearer_token, identity_from_token};
use crate::error::ApiError;
use crate::state::SharedState;

/// Wall cap on a single SSE connection.
pub const CONNECTION_CAP: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SseAuthQuery {
    #[serde(default)]
    token: Option<String>,
}

/// `GET /events`: per-user status stream.
pub(crate) async fn events(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<SseAuthQuery>,
) -> Result<Sse<impl futures_core::Stream<Item = Result<Event, Infallible>> + Send>, ApiError> {
    let identity = sse_identity(&state, &headers, query.token.as_deref())?;
    Ok(sse_response(state, Some(identity.user_id)))
}

/// `GET /admin/events`: unfiltered status stream; admin only.
pub(crate) async fn admin_events(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<SseAuthQuery>,
) -> Result<Sse<impl futures_core::Stream<Item = Result<Event, Infallible>> + Send>, ApiError> {
    let identity = sse_identity(&state, &headers, query.token.as_deref())?;
    if !identity.is_admin() {
        return Err(ApiError::forbidden("admin access required"));
    }
    Ok(sse_response(state, None))
}

fn sse_response(
    state: SharedState,
    user: Option<Uuid>,
) -> Sse<impl futures_core::Stream<Item = Result<Event, Infallible>> + Send> {
    let stream = status_events(state, user)
        .map(|(kind, data)| Ok(Event::default().event(kind).data(data)));
    Sse::new(stream)
}

fn sse_identity(
    state: &SharedState,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<crate::auth::Identity, ApiError> {
    let header_token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token);
    let token = header_token
        .or(query_token)
        .ok_or_else(|| ApiError::unauthorized("no authentication token"))?;
    identity_from_token(state, token)
}

/// The event loop as `(event, data)` pairs: `connected` immediately, then
/// once a second a `torrents` event (suppressed while the projection set is
/// empty) followed by a `heartbeat`. After the wall cap a `timeout` event is
/// emitted and the stream ends; a write error ends it silently because the
/// peer left.
fn status_events(
    state: SharedState,
    user: Option<Uuid>,
) -> impl futures_core::Stream<Item = (&'static str, String)> + Send {
    async_stream::stream! {
        yield ("connected", json!({"status": "connected"}).to_string());

        let deadline = Instant::now() + CONNECTION_CAP;
        let mut tick = interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first interval tick completes immediately; the next one lands
        // a second after connect.
        tick.tick().await;

        loop {
            tick.tick().await;

            if Instant::now() >= deadline {
                yield (
                    "timeout",
                    json!({"message": "connection timeout, please reconnect"}).to_string(),
                );
                break;
            }

            let projections = match user {
                Some(user_id) => state.engine.snapshots_for_user(user_id),
                None => state.engine.all_snapshots(),
            };
            if !projections.is_empty() {
                if let Ok(payload) = serde_json::to_string(&projections) {
                    yield ("torrents", payload);
                }
            }

            yield ("heartbeat", json!({"time": Utc::now().timestamp()}).to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthService;
    use crate::state::ApiState;
    use std::sync::Arc;
    use torva_core::swarm::SwarmStats;
    use torva_engine::{EngineConfig, StubSwarm, SwarmEngine};

    fn test_state(dir: &tempfile::TempDir) -> (SharedState, Arc<StubSwarm>) {
        let swarm = Arc::new(StubSwarm::new());
        let config = EngineConfig {
            download_dir: dir.path().to_path_buf(),
            ..EngineConfig::default()
        };
        let (engine, _updates) = SwarmEngine::new(swarm.clone(), config).expect("engine");
        let store = torva_data::Store::connect_lazy("postgres://localhost/torva-test")
            .expect("lazy store");
        let state = ApiState::new(store, engine, AuthService::new("secret", 15, 7));
        (state, swarm)
    }

    #[tokio::test]
    async fn stream_opens_with_connected_then_paces_torrents_and_heartbeat() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (state, swarm) = test_state(&dir);
        let user = Uuid::new_v4();

        let hash = "ab".repeat(20);
        state
            .engine
            .add_metainfo(Uuid::new_v4(), user, hash.as_bytes())
            .await
            .expect("admit");
        swarm.handle(&hash).expect("handle").set_stats(SwarmStats {
            has_metadata: true,
            name: Some("demo".to_string()),
            total_bytes: 10,
            completed_bytes: 5,
            peers: 1,
            ..SwarmStats::default()
        });

        let stream = status_events(state, Some(user));
        tokio::pin!(stream);

        let (kind, data) = tokio::time::timeout(Duration::from_millis(100), stream.next())
            .await
            .expect("connected arrives immediately")
            .expect("stream open");
        assert_eq!(kind, "connected");
        assert_eq!(data, r#"{"status":"connected"}"#);

        // Within 1.5 s of connecting: a torrents event, then a heartbeat.
        let (kind, data) = tokio::time::timeout(Duration::from_millis(1500), stream.next())
            .await
            .expect("torrents event within 1.5s")
            .expect("stream open");
        assert_eq!(kind, "torrents");
        assert!(data.contains(&hash));

        let (kind, data) = tokio::time::timeout(Duration::from_millis(500), stream.next())
            .await
            .expect("heartbeat follows")
            .expect("stream open");
        assert_eq!(kind, "heartbeat");
        assert!(data.contains("time"));
    }

    #[tokio::test]
    async fn empty_projection_sets_suppress_the_torrents_event() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (state, _swarm) = test_state(&dir);

        let stream = status_events(state, Some(Uuid::new_v4()));
        tokio::pin!(stream);

        let (kind, _) = stream.next().await.expect("connected");
        assert_eq!(kind, "connected");

        let (kind, _) = tokio::time::timeout(Duration::from_millis(1500), stream.next())
            .await
            .expect("next event within 1.5s")
            .expect("stream open");
        assert_eq!(kind, "heartbeat", "torrents event must be suppressed when empty");
    }
}
