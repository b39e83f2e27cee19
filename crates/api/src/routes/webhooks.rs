//! Webhook ingress.
//!
//! The body must stay as the raw bytes the provider sent; the signature is
//! computed over them, and any re-serialization would break it.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::state::AppState;

const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// `POST /webhooks/stripe`
///
/// 200 whenever the event was journaled (even if handling no-ops), 400 on
/// signature failure, 500 on store failure so the provider retries.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(signature) = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
    else {
        return (StatusCode::BAD_REQUEST, "missing signature header").into_response();
    };

    let event = match state.billing.verifier.verify(&body, signature) {
        Ok(event) => event,
        Err(e) => {
            // No journal entry, no profile write.
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    match state.billing.router.handle_event(&event).await {
        Ok(()) => Json(serde_json::json!({ "received": true })).into_response(),
        Err(e) => {
            tracing::error!(
                event_id = %event.id,
                event_type = %event.event_type,
                error = %e,
                "Webhook processing failed; provider will retry"
            );
            (StatusCode::INTERNAL_SERVER_ERROR, "event processing failed").into_response()
        }
    }
}
