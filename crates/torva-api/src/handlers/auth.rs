//! Account lifecycle handlers: register, login, refresh, logout, me.
//!
//! The lifecycle core never sees these; it only consumes the validated
//! identity the bearer middleware extracts from tokens issued here.

use axum::Json;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use torva_data::UserRecord;
use tracing::warn;

use crate::auth::{
    Identity, generate_opaque_token, hash_password, hash_refresh_token,
    validate_password_strength, verify_password,
};
use crate::error::ApiError;
use crate::handlers::SuccessResponse;
use crate::state::SharedState;

#[derive(Debug, Deserialize)]
pub(crate) struct CredentialsRequest {
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RefreshRequest {
    refresh_token: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct AuthResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    user: UserRecord,
}

/// `POST /auth/register`.
pub(crate) async fn register(
    State(state): State<SharedState>,
    Json(request): Json<CredentialsRequest>,
) -> Result<Response, ApiError> {
    let email = request.email.trim().to_ascii_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::bad_request("invalid email address"));
    }
    validate_password_strength(&request.password).map_err(ApiError::bad_request)?;

    if state.store.get_user_by_email(&email).await?.is_some() {
        return Err(ApiError::conflict("email already registered"));
    }

    let password_hash = hash_password(&request.password).map_err(ApiError::internal)?;
    let user = state.store.create_user(&email, &password_hash).await?;
    let response = issue_session(&state, user).await?;
    Ok((StatusCode::CREATED, Json(response)).into_response())
}

/// `POST /auth/login`.
pub(crate) async fn login(
    State(state): State<SharedState>,
    Json(request): Json<CredentialsRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let email = request.email.trim().to_ascii_lowercase();
    let user = state
        .store
        .get_user_by_email(&email)
        .await?
        .filter(|user| verify_password(&request.password, &user.password_hash))
        .ok_or_else(|| ApiError::unauthorized("invalid email or password"))?;

    Ok(Json(issue_session(&state, user).await?))
}

/// `POST /auth/refresh`: rotate a refresh token into a fresh session.
pub(crate) async fn refresh(
    State(state): State<SharedState>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let digest = hash_refresh_token(&request.refresh_token);
    let user_id = state
        .store
        .get_refresh_token_user(&digest)
        .await?
        .ok_or_else(|| ApiError::unauthorized("invalid refresh token"))?;

    let user = state
        .store
        .get_user_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::unauthorized("invalid refresh token"))?;

    state.store.delete_refresh_token(&digest).await?;
    Ok(Json(issue_session(&state, user).await?))
}

/// `POST /auth/logout`.
pub(crate) async fn logout(
    State(state): State<SharedState>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let digest = hash_refresh_token(&request.refresh_token);
    if let Err(err) = state.store.delete_refresh_token(&digest).await {
        warn!(error = %err, "failed to delete refresh token on logout");
    }
    Ok(Json(SuccessResponse::new("logged out")))
}

/// `GET /auth/me`.
pub(crate) async fn me(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
) -> Result<Response, ApiError> {
    let user = state
        .store
        .get_user_by_id(identity.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("user not found"))?;
    let subscription = state.store.get_subscription(identity.user_id).await?;
    Ok(Json(json!({ "user": user, "subscription": subscription })).into_response())
}

async fn issue_session(state: &SharedState, user: UserRecord) -> Result<AuthResponse, ApiError> {
    let access_token = state
        .auth
        .issue_access_token(user.id, &user.email, &user.role)
        .map_err(ApiError::internal)?;

    let refresh_token = generate_opaque_token();
    let digest = hash_refresh_token(&refresh_token);
    state
        .store
        .save_refresh_token(user.id, &digest, state.auth.refresh_deadline())
        .await?;

    Ok(AuthResponse {
        access_token,
        refresh_token,
        expires_in: state.auth.access_expiry_secs(),
        user,
    })
}
