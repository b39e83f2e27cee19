//! Internal entitlement queries and the usage increment contract.
//!
//! Tools call these before gated operations. The decision itself is a pure
//! computation; these handlers only load the profile/usage snapshot first.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use fileforge_billing::Decision;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct EntitlementsResponse {
    pub user_id: String,
    pub plan_id: String,
    pub status: String,
    pub subscription_active: bool,
    pub heavy_op: Decision,
    pub light_op: Decision,
    pub max_file_size_bytes: i64,
    pub max_batch_size: i64,
}

/// `GET /internal/users/{user_id}/entitlements`
pub async fn get_entitlements(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<EntitlementsResponse>, ApiError> {
    let billing = &state.billing;
    let profile = billing.profiles.get(&user_id).await?;
    let usage = billing.usage.get_today(&user_id).await?;

    let entitlements = billing.entitlements.entitlements_for(profile.plan_id);
    let response = EntitlementsResponse {
        user_id,
        plan_id: profile.plan_id.to_string(),
        status: profile.status.to_string(),
        subscription_active: billing
            .entitlements
            .is_subscription_active(&profile, OffsetDateTime::now_utc()),
        heavy_op: billing.entitlements.can_perform_heavy_op(&profile, &usage),
        light_op: billing.entitlements.can_perform_light_op(&profile, &usage),
        max_file_size_bytes: entitlements.max_file_size_bytes,
        max_batch_size: entitlements.max_batch_size,
    };
    Ok(Json(response))
}

/// `POST /internal/users/{user_id}/usage/heavy`
pub async fn record_heavy_op(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.billing.usage.record_heavy_op(&user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /internal/users/{user_id}/usage/light`
pub async fn record_light_op(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.billing.usage.record_light_op(&user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct FilesProcessed {
    pub count: i64,
    pub bytes: i64,
}

/// `POST /internal/users/{user_id}/usage/files`
pub async fn record_files(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<FilesProcessed>,
) -> Result<StatusCode, ApiError> {
    state
        .billing
        .usage
        .record_files(&user_id, body.count, body.bytes)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
