//! Mapping billing errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fileforge_billing::BillingError;

pub struct ApiError(pub BillingError);

impl From<BillingError> for ApiError {
    fn from(e: BillingError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            // Signature failures are the caller's problem; no state changed.
            BillingError::WebhookSignatureInvalid => StatusCode::BAD_REQUEST,
            BillingError::InvalidPlan(_) => StatusCode::UNPROCESSABLE_ENTITY,
            // Everything else surfaces as a 500 so the provider retries.
            BillingError::Database(_)
            | BillingError::IdentityUnresolved
            | BillingError::EventNotSupported(_)
            | BillingError::Config(_)
            | BillingError::StripeApi(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (status, self.0.to_string()).into_response()
    }
}
