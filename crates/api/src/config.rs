//! Server configuration, loaded once at startup.

use fileforge_billing::{PricingConfig, DEFAULT_GRACE_PERIOD_DAYS};

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    /// Shared secret the payment processor signs webhook payloads with.
    pub webhook_secret: String,
    /// Stripe API key for the identity write-back. Optional; without it the
    /// write-back is skipped.
    pub stripe_secret_key: Option<String>,
    pub grace_period_days: i64,
    pub pricing: PricingConfig,
    /// Shared token required on `/internal/*` routes. Optional in
    /// development; internal routes are open when unset.
    pub internal_token: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL not set"))?;
        let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .map_err(|_| anyhow::anyhow!("STRIPE_WEBHOOK_SECRET not set"))?;

        Ok(Self {
            database_url,
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            webhook_secret,
            stripe_secret_key: std::env::var("STRIPE_SECRET_KEY").ok(),
            grace_period_days: std::env::var("GRACE_PERIOD_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_GRACE_PERIOD_DAYS),
            pricing: PricingConfig::from_env(),
            internal_token: std::env::var("INTERNAL_API_TOKEN").ok(),
        })
    }
}
