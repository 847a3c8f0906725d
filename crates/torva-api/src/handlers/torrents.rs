//! Torrent lifecycle handlers: admission, listing, detail, removal,
//! pause/resume, and download-token minting.

use axum::Json;
use axum::extract::{Extension, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use torva_core::{Plan, StatusUpdate, TorrentRecord, TorrentStatus};
use torva_data::NewTorrent;
use torva_engine::AddOutcome;
use tracing::warn;
use uuid::Uuid;

use crate::auth::{Identity, generate_opaque_token};
use crate::error::{ApiError, codes};
use crate::handlers::{Pagination, SuccessResponse};
use crate::state::SharedState;

/// Default download-token policy.
const TOKEN_MAX_DOWNLOADS: u32 = 10;
const TOKEN_TTL_HOURS: i64 = 24;

#[derive(Debug, Deserialize)]
pub(crate) struct AddTorrentRequest {
    #[serde(default)]
    magnet_uri: Option<String>,
    #[serde(default)]
    torrent_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct TorrentListResponse {
    torrents: Vec<TorrentRecord>,
    total_count: i64,
    page: i64,
    page_size: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeleteQuery {
    #[serde(default)]
    delete_files: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenRequest {
    #[serde(default)]
    file_path: String,
    #[serde(default)]
    use_zip: bool,
}

/// `POST /torrents`: admit a magnet link or a server-side fetched
/// `.torrent` URL.
pub(crate) async fn add_torrent(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<AddTorrentRequest>,
) -> Result<Response, ApiError> {
    check_quota(&state, identity.user_id).await?;

    let torrent_id = Uuid::new_v4();
    let magnet = request.magnet_uri.as_deref().filter(|uri| !uri.is_empty());
    let url = request.torrent_url.as_deref().filter(|url| !url.is_empty());

    let (outcome, magnet_uri) = match (magnet, url) {
        (Some(magnet), _) => {
            if !magnet.starts_with("magnet:") {
                return Err(ApiError::bad_request("invalid magnet URI"));
            }
            let outcome = state
                .engine
                .add_magnet(torrent_id, identity.user_id, magnet)
                .await
                .map_err(|err| {
                    ApiError::bad_request("failed to add magnet").with_details(err.to_string())
                })?;
            (outcome, Some(magnet.to_string()))
        }
        (None, Some(url)) => {
            let bytes = fetch_metainfo(&state, url).await?;
            let outcome = state
                .engine
                .add_metainfo(torrent_id, identity.user_id, &bytes)
                .await
                .map_err(|err| {
                    ApiError::bad_request("failed to parse torrent file")
                        .with_details(err.to_string())
                })?;
            (outcome, None)
        }
        (None, None) => {
            return Err(ApiError::bad_request("magnet_uri or torrent_url required"));
        }
    };

    finish_admission(&state, &identity, torrent_id, magnet_uri, outcome).await
}

/// `POST /torrents/upload`: admit an uploaded `.torrent` file.
pub(crate) async fn upload_torrent(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    check_quota(&state, identity.user_id).await?;

    let mut payload: Option<Vec<u8>> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::bad_request("invalid multipart body").with_details(err.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_ascii_lowercase();
        if !file_name.ends_with(".torrent") {
            return Err(ApiError::bad_request("file must be a .torrent file"));
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|err| ApiError::bad_request("failed to read upload").with_details(err.to_string()))?;
        payload = Some(bytes.to_vec());
        break;
    }

    let bytes = payload.ok_or_else(|| ApiError::bad_request("no file uploaded"))?;
    let torrent_id = Uuid::new_v4();
    let outcome = state
        .engine
        .add_metainfo(torrent_id, identity.user_id, &bytes)
        .await
        .map_err(|err| {
            ApiError::bad_request("failed to parse torrent file").with_details(err.to_string())
        })?;

    finish_admission(&state, &identity, torrent_id, None, outcome).await
}

/// `GET /torrents`: paginated listing merged with live engine stats.
pub(crate) async fn list_torrents(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<TorrentListResponse>, ApiError> {
    let (page, page_size, offset) = pagination.clamp();
    let (mut torrents, total_count) = state
        .store
        .list_torrents_for_user(identity.user_id, page_size, offset)
        .await?;

    for record in &mut torrents {
        overlay_live_stats(&state, record);
    }

    Ok(Json(TorrentListResponse {
        torrents,
        total_count,
        page,
        page_size,
    }))
}

/// `GET /torrents/{id}`: detail plus live stats; owner or admin.
pub(crate) async fn get_torrent(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<Json<TorrentRecord>, ApiError> {
    let record = owned_torrent(&state, &identity, &id, true).await?;
    let mut record = record;
    overlay_live_stats(&state, &mut record);
    Ok(Json(record))
}

/// `DELETE /torrents/{id}?delete_files=`: drop from the engine and delete
/// the record; owner or admin.
pub(crate) async fn delete_torrent(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let record = owned_torrent(&state, &identity, &id, true).await?;
    let delete_files = query.delete_files.unwrap_or(true);

    if let Err(err) = state.engine.remove(&record.info_hash, delete_files).await {
        // Terminal records have no participation; the row still goes away.
        warn!(error = %err, info_hash = %record.info_hash, "engine removal skipped");
    }
    if delete_files {
        state.engine.delete_archive(&record.name);
    }
    state.store.delete_torrent(record.id).await?;

    Ok(Json(SuccessResponse::new("torrent deleted")))
}

/// `POST /torrents/{id}/pause`: zero the peer ceiling; owner only.
pub(crate) async fn pause_torrent(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let record = owned_torrent(&state, &identity, &id, false).await?;
    state
        .engine
        .pause(&record.info_hash)
        .await
        .map_err(ApiError::internal)?;
    state
        .store
        .set_torrent_status(record.id, TorrentStatus::Paused)
        .await?;
    Ok(Json(SuccessResponse::new("torrent paused")))
}

/// `POST /torrents/{id}/resume`: restore the configured peer ceiling;
/// owner only, re-checked against quota.
pub(crate) async fn resume_torrent(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let record = owned_torrent(&state, &identity, &id, false).await?;
    check_quota(&state, identity.user_id).await?;
    state
        .engine
        .resume(&record.info_hash)
        .await
        .map_err(ApiError::internal)?;
    state
        .store
        .set_torrent_status(record.id, TorrentStatus::Downloading)
        .await?;
    Ok(Json(SuccessResponse::new("torrent resumed")))
}

/// `POST /torrents/{id}/token`: mint a public download token.
pub(crate) async fn create_download_token(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    Json(request): Json<TokenRequest>,
) -> Result<Response, ApiError> {
    let record = owned_torrent(&state, &identity, &id, false).await?;

    let is_zip = request.use_zip && record.zip_path.as_deref().is_some_and(|path| !path.is_empty());
    let file_path = if is_zip {
        record.zip_path.clone().unwrap_or_default()
    } else {
        request.file_path
    };

    let token = generate_opaque_token();
    let expires_at = Utc::now() + Duration::hours(TOKEN_TTL_HOURS);
    state
        .store
        .create_download_token(record.id, &file_path, &token, TOKEN_MAX_DOWNLOADS, expires_at)
        .await?;

    let body = json!({
        "token": token,
        "download_url": format!("/api/v1/download/{token}"),
        "expires_in": TOKEN_TTL_HOURS * 60 * 60,
        "is_zip": is_zip,
    });
    Ok(Json(body).into_response())
}

/// Concurrency and monthly-bandwidth quota gate, evaluated against the
/// caller's subscription snapshot.
async fn check_quota(state: &SharedState, user_id: Uuid) -> Result<(), ApiError> {
    let subscription = state.store.get_subscription(user_id).await?;
    let plan = subscription
        .as_ref()
        .and_then(|sub| Plan::named(&sub.plan))
        .unwrap_or_else(Plan::free);

    let active = state.store.count_active_torrents(user_id).await?;
    if active >= i64::from(plan.concurrent_limit) {
        return Err(ApiError::forbidden("concurrent download limit reached")
            .with_code(codes::CONCURRENT_LIMIT));
    }

    if let Some(limit_bytes) = plan.monthly_limit_bytes() {
        let used = state.store.get_monthly_usage(user_id).await?;
        if used >= i64::try_from(limit_bytes).unwrap_or(i64::MAX) {
            return Err(ApiError::forbidden("monthly download limit reached")
                .with_code(codes::BANDWIDTH_LIMIT));
        }
    }
    Ok(())
}

async fn fetch_metainfo(state: &SharedState, url: &str) -> Result<Vec<u8>, ApiError> {
    let response = state.http.get(url).send().await.map_err(|err| {
        ApiError::bad_request("failed to download torrent file").with_details(err.to_string())
    })?;
    if !response.status().is_success() {
        return Err(ApiError::bad_request(format!(
            "failed to download torrent file: {}",
            response.status()
        )));
    }
    let bytes = response.bytes().await.map_err(|err| {
        ApiError::bad_request("failed to download torrent file").with_details(err.to_string())
    })?;
    Ok(bytes.to_vec())
}

async fn finish_admission(
    state: &SharedState,
    identity: &Identity,
    torrent_id: Uuid,
    magnet_uri: Option<String>,
    outcome: AddOutcome,
) -> Result<Response, ApiError> {
    match outcome {
        AddOutcome::Exists { user_id, info_hash, .. } => {
            if user_id == identity.user_id {
                if let Some(existing) = state
                    .store
                    .get_torrent_by_info_hash(identity.user_id, &info_hash)
                    .await?
                {
                    let mut existing = existing;
                    overlay_live_stats(state, &mut existing);
                    return Ok((StatusCode::OK, Json(existing)).into_response());
                }
            }
            Err(ApiError::conflict("torrent already exists").with_code(codes::TORRENT_EXISTS))
        }
        AddOutcome::Added(update) => {
            state
                .store
                .create_torrent(&new_torrent(identity.user_id, torrent_id, magnet_uri, &update))
                .await?;
            let record = state
                .store
                .get_torrent(torrent_id)
                .await?
                .ok_or_else(|| ApiError::internal("admitted torrent row missing"))?;
            Ok((StatusCode::CREATED, Json(record)).into_response())
        }
    }
}

fn new_torrent(
    user_id: Uuid,
    torrent_id: Uuid,
    magnet_uri: Option<String>,
    update: &StatusUpdate,
) -> NewTorrent {
    NewTorrent {
        id: torrent_id,
        user_id,
        info_hash: update.info_hash.clone(),
        name: update.name.clone().unwrap_or_default(),
        magnet_uri,
        status: update.status,
        total_size: update.total_size,
    }
}

/// Fetch a torrent by path id and enforce ownership.
pub(crate) async fn owned_torrent(
    state: &SharedState,
    identity: &Identity,
    id: &str,
    admin_override: bool,
) -> Result<TorrentRecord, ApiError> {
    let torrent_id =
        Uuid::parse_str(id).map_err(|_| ApiError::bad_request("invalid torrent ID"))?;
    let record = state
        .store
        .get_torrent(torrent_id)
        .await?
        .ok_or_else(|| ApiError::not_found("torrent not found"))?;

    let permitted = record.user_id == identity.user_id || (admin_override && identity.is_admin());
    if !permitted {
        return Err(ApiError::forbidden("access denied"));
    }
    Ok(record)
}

/// Merge live engine stats over a stored record, when the swarm
/// participation is alive.
pub(crate) fn overlay_live_stats(state: &SharedState, record: &mut TorrentRecord) {
    let Some(live) = state.engine.status(&record.info_hash) else {
        return;
    };
    record.download_speed = live.download_speed;
    record.upload_speed = live.upload_speed;
    record.progress = live.progress;
    record.peers = live.peers;
    record.seeds = live.seeds;
    record.downloaded = live.downloaded;
    if !live.files.is_empty() {
        record.files = live.files;
    }
    if let Some(name) = live.name {
        if !name.is_empty() {
            record.name = name;
        }
    }
    if live.total_size > 0 {
        record.total_size = live.total_size;
    }
    record.status = live.status;
}
