//! Admin surface: user management, platform-wide torrent listing, stats,
//! and the forced retention sweep.

use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use torva_core::{Plan, TorrentStatus};
use tracing::warn;
use uuid::Uuid;

use crate::auth::Identity;
use crate::error::ApiError;
use crate::handlers::torrents::{overlay_live_stats, owned_torrent};
use crate::handlers::{Pagination, SuccessResponse};
use crate::state::SharedState;

const VALID_ROLES: &[&str] = &["user", "premium", "demo", "admin"];

#[derive(Debug, Deserialize)]
pub(crate) struct UpdateUserRequest {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    plan: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AdminDeleteQuery {
    #[serde(default)]
    delete_files: Option<bool>,
}

/// `GET /admin/users`: paginated users enriched with subscriptions.
pub(crate) async fn list_users(
    State(state): State<SharedState>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Value>, ApiError> {
    let (page, page_size, offset) = pagination.clamp();
    let (users, total_count) = state.store.list_users(page_size, offset).await?;

    let mut enriched = Vec::with_capacity(users.len());
    for user in users {
        let subscription = state.store.get_subscription(user.id).await?;
        enriched.push(json!({ "user": user, "subscription": subscription }));
    }

    Ok(Json(json!({
        "users": enriched,
        "total_count": total_count,
        "page": page,
        "page_size": page_size,
    })))
}

/// `GET /admin/users/{id}`: one user with usage and recent torrents.
pub(crate) async fn get_user(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let user_id = parse_user_id(&id)?;
    let user = state
        .store
        .get_user_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("user not found"))?;

    let subscription = state.store.get_subscription(user_id).await?;
    let monthly_bytes = state.store.get_monthly_usage(user_id).await?;
    let active_torrents = state.store.count_active_torrents(user_id).await?;
    let (torrents, total_torrents) = state.store.list_torrents_for_user(user_id, 10, 0).await?;

    #[allow(clippy::cast_precision_loss)]
    let monthly_gb = monthly_bytes as f64 / (1024.0 * 1024.0 * 1024.0);

    Ok(Json(json!({
        "user": user,
        "subscription": subscription,
        "usage": {
            "monthly_bytes": monthly_bytes,
            "monthly_gb": monthly_gb,
            "active_torrents": active_torrents,
        },
        "torrents": { "items": torrents, "total": total_torrents },
    })))
}

/// `PATCH /admin/users/{id}`: change role and/or plan.
pub(crate) async fn update_user(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateUserRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let user_id = parse_user_id(&id)?;

    if let Some(role) = request.role.as_deref().filter(|role| !role.is_empty()) {
        if !VALID_ROLES.contains(&role) {
            return Err(ApiError::bad_request("invalid role"));
        }
        state.store.update_user_role(user_id, role).await?;
    }

    if let Some(plan_name) = request.plan.as_deref().filter(|plan| !plan.is_empty()) {
        let plan = Plan::named(plan_name).ok_or_else(|| ApiError::bad_request("invalid plan"))?;
        state
            .store
            .update_subscription(user_id, &plan, "active")
            .await?;
    }

    Ok(Json(SuccessResponse::new("user updated")))
}

/// `DELETE /admin/users/{id}`: drop the user's torrents from the engine
/// and remove the account; dependent rows cascade.
pub(crate) async fn delete_user(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let user_id = parse_user_id(&id)?;

    let (torrents, _) = state.store.list_torrents_for_user(user_id, 1000, 0).await?;
    for torrent in torrents {
        if let Err(err) = state.engine.remove(&torrent.info_hash, true).await {
            warn!(error = %err, info_hash = %torrent.info_hash, "engine removal skipped");
        }
        state.engine.delete_archive(&torrent.name);
    }

    state.store.delete_user(user_id).await?;
    Ok(Json(SuccessResponse::new("user deleted")))
}

/// `GET /admin/torrents`: platform-wide torrent listing with live stats.
pub(crate) async fn list_all_torrents(
    State(state): State<SharedState>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Value>, ApiError> {
    let (page, page_size, offset) = pagination.clamp();
    let (mut torrents, total_count) = state.store.list_all_torrents(page_size, offset).await?;
    for record in &mut torrents {
        overlay_live_stats(&state, record);
    }

    Ok(Json(json!({
        "torrents": torrents,
        "total_count": total_count,
        "page": page,
        "page_size": page_size,
    })))
}

/// `DELETE /admin/torrents/{id}`: admin override removal.
pub(crate) async fn delete_any_torrent(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    Query(query): Query<AdminDeleteQuery>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let record = owned_torrent(&state, &identity, &id, true).await?;
    let delete_files = query.delete_files.unwrap_or(true);

    if let Err(err) = state.engine.remove(&record.info_hash, delete_files).await {
        warn!(error = %err, info_hash = %record.info_hash, "engine removal skipped");
    }
    if delete_files {
        state.engine.delete_archive(&record.name);
    }
    state.store.delete_torrent(record.id).await?;
    Ok(Json(SuccessResponse::new("torrent deleted")))
}

/// `GET /admin/stats`: platform statistics.
pub(crate) async fn stats(State(state): State<SharedState>) -> Result<Json<Value>, ApiError> {
    let (_, total_users) = state.store.list_users(1, 0).await?;
    let (_, total_torrents) = state.store.list_all_torrents(1, 0).await?;

    let live = state.engine.all_snapshots();
    let mut downloading = 0u32;
    let mut seeding = 0u32;
    let mut completed = 0u32;
    let mut download_speed = 0.0f64;
    let mut upload_speed = 0.0f64;
    for snapshot in &live {
        match snapshot.status {
            TorrentStatus::Downloading => downloading += 1,
            TorrentStatus::Seeding => seeding += 1,
            TorrentStatus::Completed => completed += 1,
            _ => {}
        }
        download_speed += snapshot.download_speed;
        upload_speed += snapshot.upload_speed;
    }

    Ok(Json(json!({
        "users": { "total": total_users },
        "torrents": {
            "total": total_torrents,
            "active": live.len(),
            "downloading": downloading,
            "seeding": seeding,
            "completed": completed,
        },
        "bandwidth": {
            "download_speed_bps": download_speed,
            "upload_speed_bps": upload_speed,
        },
        "timestamp": Utc::now(),
    })))
}

/// `POST /admin/cleanup`: force one retention sweep.
pub(crate) async fn cleanup(State(state): State<SharedState>) -> Result<Json<Value>, ApiError> {
    let removed = torva_engine::sweeper::sweep_once(&state.store, &state.engine)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({ "message": "cleanup complete", "removed": removed })))
}

fn parse_user_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|_| ApiError::bad_request("invalid user ID"))
}
