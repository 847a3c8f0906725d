//! Subscription surface. The payment provider is an external collaborator;
//! only the read side lives here, and the checkout/portal routes answer 503
//! until a provider is configured.

use axum::Json;
use axum::extract::{Extension, State};
use serde_json::{Value, json};
use torva_core::Plan;

use crate::auth::Identity;
use crate::error::ApiError;
use crate::state::SharedState;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// `GET /subscription`: plan snapshot plus current-month usage.
pub(crate) async fn get_subscription(
    State(state): State<SharedState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Value>, ApiError> {
    let subscription = state.store.get_subscription(identity.user_id).await?;
    let plan = subscription
        .as_ref()
        .and_then(|sub| Plan::named(&sub.plan))
        .unwrap_or_else(Plan::free);

    let monthly_bytes = state.store.get_monthly_usage(identity.user_id).await?;
    let active = state.store.count_active_torrents(identity.user_id).await?;

    #[allow(clippy::cast_precision_loss)]
    let used_gb = monthly_bytes as f64 / BYTES_PER_GB;

    Ok(Json(json!({
        "subscription": subscription,
        "usage": {
            "plan": plan.name,
            "used_gb": used_gb,
            "limit_gb": plan.monthly_limit_gib,
            "active_torrents": active,
            "concurrent_limit": plan.concurrent_limit,
            "retention_days": plan.retention_days,
        },
    })))
}

/// `POST /subscription/checkout`. Answers 503 until a payment provider is
/// wired up; the provider integration itself is outside the core.
pub(crate) async fn create_checkout(
    State(state): State<SharedState>,
    Extension(_identity): Extension<Identity>,
) -> Result<Json<Value>, ApiError> {
    require_billing(&state)?;
    Err(ApiError::unavailable("checkout is not available"))
}

/// `POST /subscription/portal`. Same contract as checkout.
pub(crate) async fn create_portal(
    State(state): State<SharedState>,
    Extension(_identity): Extension<Identity>,
) -> Result<Json<Value>, ApiError> {
    require_billing(&state)?;
    Err(ApiError::unavailable("billing portal is not available"))
}

fn require_billing(state: &SharedState) -> Result<(), ApiError> {
    if state.billing_configured {
        Ok(())
    } else {
        Err(ApiError::unavailable("billing collaborator not configured"))
    }
}
