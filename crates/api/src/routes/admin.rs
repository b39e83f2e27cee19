//! Internal admin operations.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use fileforge_billing::{BillingError, BillingProfile, InvariantCheckSummary};
use fileforge_shared::PlanId;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SetPlanRequest {
    pub plan_id: String,
    #[serde(default = "default_actor")]
    pub actor: String,
}

fn default_actor() -> String {
    "admin".to_string()
}

/// `POST /internal/admin/users/{user_id}/plan`
///
/// Manual upgrade/downgrade, journaled like any other billing event. Unlike
/// the webhook path, an unknown plan here is an input error, not a
/// downgrade.
pub async fn set_plan(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<SetPlanRequest>,
) -> Result<Json<BillingProfile>, ApiError> {
    let plan = PlanId::parse(&body.plan_id)
        .ok_or_else(|| BillingError::InvalidPlan(body.plan_id.clone()))?;

    let profile = state
        .billing
        .router
        .manual_plan_change(&user_id, plan, &body.actor)
        .await?;
    Ok(Json(profile))
}

/// `GET /internal/admin/invariants`
pub async fn run_invariants(
    State(state): State<AppState>,
) -> Result<Json<InvariantCheckSummary>, ApiError> {
    let summary = state.billing.invariants.run_all_checks().await?;
    Ok(Json(summary))
}
