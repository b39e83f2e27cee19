//! Billing error types.

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    /// Signature header missing, malformed, stale, or wrong. Surfaces as a
    /// 4xx with no state change. The message never carries secret material.
    #[error("webhook signature verification failed")]
    WebhookSignatureInvalid,

    /// None of the identity hints on an event resolved to an internal user.
    /// Journaled with `processed = false`; requires manual remediation.
    #[error("could not resolve event to an internal user")]
    IdentityUnresolved,

    /// Profile or journal write failed. Surfaced as a 500 so the provider
    /// retries the whole event; safe because handlers are idempotent.
    #[error("database error: {0}")]
    Database(String),

    /// Event payload did not have the object shape its type promises.
    #[error("unsupported event payload: {0}")]
    EventNotSupported(String),

    /// A plan id outside the known set where one is required (admin paths).
    /// The webhook path never raises this; it downgrades to free instead.
    #[error("unknown plan: {0}")]
    InvalidPlan(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// Outbound Stripe call failed (identity write-back only). Always
    /// absorbed by the caller with a warning.
    #[error("stripe api error: {0}")]
    StripeApi(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        BillingError::Database(e.to_string())
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(e: reqwest::Error) -> Self {
        BillingError::StripeApi(e.to_string())
    }
}
