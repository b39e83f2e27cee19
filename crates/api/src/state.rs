//! Application state

use std::sync::Arc;

use fileforge_billing::{BillingConfig, BillingService};
use sqlx::PgPool;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub billing: Arc<BillingService>,
}

impl AppState {
    pub fn new(config: Config, pool: PgPool) -> anyhow::Result<Self> {
        let billing = BillingService::new(
            BillingConfig {
                webhook_secret: config.webhook_secret.clone(),
                stripe_secret_key: config.stripe_secret_key.clone(),
                grace_period_days: config.grace_period_days,
                pricing: config.pricing.clone(),
            },
            pool.clone(),
        );

        Ok(Self {
            pool,
            config,
            billing: Arc::new(billing),
        })
    }
}
