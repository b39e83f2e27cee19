//! Route table.

mod admin;
mod entitlements;
mod webhooks;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    let internal = Router::new()
        .route(
            "/internal/users/{user_id}/entitlements",
            get(entitlements::get_entitlements),
        )
        .route(
            "/internal/users/{user_id}/usage/heavy",
            post(entitlements::record_heavy_op),
        )
        .route(
            "/internal/users/{user_id}/usage/light",
            post(entitlements::record_light_op),
        )
        .route(
            "/internal/users/{user_id}/usage/files",
            post(entitlements::record_files),
        )
        .route("/internal/admin/users/{user_id}/plan", post(admin::set_plan))
        .route("/internal/admin/invariants", get(admin::run_invariants))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_internal_token,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/webhooks/stripe", post(webhooks::stripe_webhook))
        .merge(internal)
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Internal routes are service-to-service only: when a token is configured,
/// every request must present it in `x-internal-token`.
async fn require_internal_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(expected) = &state.config.internal_token {
        let presented = request
            .headers()
            .get("x-internal-token")
            .and_then(|v| v.to_str().ok());
        if presented != Some(expected.as_str()) {
            return (StatusCode::UNAUTHORIZED, "missing or invalid internal token")
                .into_response();
        }
    }
    next.run(request).await
}
