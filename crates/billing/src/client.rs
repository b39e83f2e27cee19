//! Thin Stripe API client.
//!
//! The engine only talks back to Stripe for one thing: annotating a customer
//! record with the internal user id after a fallback identity resolution, so
//! future events for that customer carry the id directly.

use std::time::Duration;

use crate::error::{BillingError, BillingResult};

const DEFAULT_API_BASE: &str = "https://api.stripe.com";

#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
}

impl StripeClient {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            api_base: DEFAULT_API_BASE.to_string(),
            secret_key: secret_key.into(),
        }
    }

    /// Write the resolved internal user id into the customer's metadata.
    /// Best-effort: callers log failures and move on.
    pub async fn annotate_customer_user_id(
        &self,
        customer_id: &str,
        user_id: &str,
    ) -> BillingResult<()> {
        let url = format!("{}/v1/customers/{customer_id}", self.api_base);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.secret_key)
            .form(&[("metadata[userId]", user_id)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BillingError::StripeApi(format!(
                "customer update returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
