// Billing crate clippy configuration
#![allow(clippy::type_complexity)] // Merge closures have involved signatures
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! FileForge Billing Engine
//!
//! Reconciles asynchronous, out-of-order, duplicate-prone payment-provider
//! events into a single consistent per-user subscription state, and answers
//! entitlement queries derived from that state plus daily usage counters.
//!
//! ## Components
//!
//! - **Verification**: signed webhook payloads checked before any state change
//! - **Identity**: fallback chain mapping event hints to one internal user
//! - **Reconciliation**: per-category handlers applied as idempotent merges
//! - **Journal**: one audit row per provider event id, overwritten on retry
//! - **Entitlements**: pure decisions over profile + usage snapshots
//! - **Usage**: per-user per-UTC-day counters, partitioned by key selection

pub mod client;
pub mod entitlement;
pub mod error;
pub mod events;
pub mod identity;
pub mod invariants;
pub mod pricing;
pub mod profile;
pub mod reconcile;
pub mod usage;
pub mod verify;

#[cfg(test)]
mod edge_case_tests;

// Client
pub use client::StripeClient;

// Entitlements
pub use entitlement::{Decision, EntitlementsResolver, DEFAULT_GRACE_PERIOD_DAYS};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{BillingEventRecord, EventCategory, EventJournal, WebhookEvent};

// Identity
pub use identity::{HintSource, IdentityHints, IdentityResolver, Resolution};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Pricing
pub use pricing::{PlanEntitlements, PricingConfig};

// Profile
pub use profile::{BillingProfile, ProfileStore};

// Reconciliation
pub use reconcile::{ReconciliationRouter, CHECKOUT_FALLBACK_PERIOD_DAYS};

// Usage
pub use usage::{day_key, UsageRecord, UsageStore};

// Verification
pub use verify::{WebhookVerifier, SIGNATURE_TOLERANCE_SECS};

use std::sync::Arc;

use sqlx::PgPool;

/// Billing engine configuration.
#[derive(Clone)]
pub struct BillingConfig {
    /// Shared secret the provider signs webhook payloads with.
    pub webhook_secret: String,
    /// API key for the identity write-back; `None` disables the write-back.
    pub stripe_secret_key: Option<String>,
    pub grace_period_days: i64,
    pub pricing: PricingConfig,
}

impl BillingConfig {
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET")
                .map_err(|_| BillingError::Config("STRIPE_WEBHOOK_SECRET not set".to_string()))?,
            stripe_secret_key: std::env::var("STRIPE_SECRET_KEY").ok(),
            grace_period_days: std::env::var("GRACE_PERIOD_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_GRACE_PERIOD_DAYS),
            pricing: PricingConfig::from_env(),
        })
    }
}

/// Main billing service combining verification, reconciliation, and
/// entitlement queries.
pub struct BillingService {
    pub verifier: WebhookVerifier,
    pub router: ReconciliationRouter,
    pub profiles: ProfileStore,
    pub usage: UsageStore,
    pub entitlements: EntitlementsResolver,
    pub invariants: InvariantChecker,
}

impl BillingService {
    pub fn new(config: BillingConfig, pool: PgPool) -> Self {
        let pricing = Arc::new(config.pricing);
        let profiles = ProfileStore::new(pool.clone());
        let journal = EventJournal::new(pool.clone());
        let stripe = config.stripe_secret_key.map(StripeClient::new);
        let identity = IdentityResolver::new(profiles.clone(), stripe);

        Self {
            verifier: WebhookVerifier::new(config.webhook_secret),
            router: ReconciliationRouter::new(
                profiles.clone(),
                journal,
                identity,
                pricing.clone(),
            ),
            profiles,
            usage: UsageStore::new(pool.clone()),
            entitlements: EntitlementsResolver::new(pricing, config.grace_period_days),
            invariants: InvariantChecker::new(pool),
        }
    }

    /// Create a billing service from environment variables.
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        Ok(Self::new(BillingConfig::from_env()?, pool))
    }
}
