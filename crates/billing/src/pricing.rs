//! Plan pricing and entitlement configuration.
//!
//! Loaded once at startup, wrapped in `Arc`, and injected into the
//! entitlements resolver and the reconciliation router. Never mutated after
//! load.

use fileforge_shared::PlanId;

/// What a plan entitles a user to.
#[derive(Debug, Clone)]
pub struct PlanEntitlements {
    pub heavy_ops_per_day: i64,
    pub light_ops_per_day: i64,
    pub max_file_size_bytes: i64,
    pub max_batch_size: i64,
    pub support_tier: &'static str,
    /// Tool ids this plan is not allowed to use.
    pub restricted_tools: Vec<String>,
    /// Stripe price id for this plan, used to reverse-map subscription
    /// events that carry no plan metadata. Free has none.
    pub stripe_price_id: Option<String>,
}

/// Process-wide pricing configuration. One entry per plan, so every lookup
/// is total.
#[derive(Debug, Clone)]
pub struct PricingConfig {
    free: PlanEntitlements,
    pro: PlanEntitlements,
    pro_plus: PlanEntitlements,
}

const MB: i64 = 1024 * 1024;

impl PricingConfig {
    /// Built-in plan table with no Stripe price ids attached.
    pub fn default_plans() -> Self {
        Self {
            free: PlanEntitlements {
                heavy_ops_per_day: 3,
                light_ops_per_day: 50,
                max_file_size_bytes: 25 * MB,
                max_batch_size: 3,
                support_tier: "community",
                restricted_tools: vec!["batch-convert".to_string(), "ocr".to_string()],
                stripe_price_id: None,
            },
            pro: PlanEntitlements {
                heavy_ops_per_day: 100,
                light_ops_per_day: 1_000,
                max_file_size_bytes: 200 * MB,
                max_batch_size: 20,
                support_tier: "email",
                restricted_tools: vec![],
                stripe_price_id: None,
            },
            pro_plus: PlanEntitlements {
                heavy_ops_per_day: 1_000,
                light_ops_per_day: 10_000,
                max_file_size_bytes: 1024 * MB,
                max_batch_size: 100,
                support_tier: "priority",
                restricted_tools: vec![],
                stripe_price_id: None,
            },
        }
    }

    /// Default plan table with price ids from `STRIPE_PRICE_PRO` /
    /// `STRIPE_PRICE_PRO_PLUS` when present.
    pub fn from_env() -> Self {
        let mut config = Self::default_plans();
        config.set_price_id(PlanId::Pro, std::env::var("STRIPE_PRICE_PRO").ok());
        config.set_price_id(PlanId::ProPlus, std::env::var("STRIPE_PRICE_PRO_PLUS").ok());
        config
    }

    pub fn set_price_id(&mut self, plan: PlanId, price_id: Option<String>) {
        match plan {
            PlanId::Free => self.free.stripe_price_id = price_id,
            PlanId::Pro => self.pro.stripe_price_id = price_id,
            PlanId::ProPlus => self.pro_plus.stripe_price_id = price_id,
        }
    }

    pub fn entitlements_for(&self, plan: PlanId) -> &PlanEntitlements {
        match plan {
            PlanId::Free => &self.free,
            PlanId::Pro => &self.pro,
            PlanId::ProPlus => &self.pro_plus,
        }
    }

    /// Reverse lookup from a Stripe price id to the plan it sells.
    pub fn plan_for_price(&self, price_id: &str) -> Option<PlanId> {
        [
            (PlanId::Free, &self.free),
            (PlanId::Pro, &self.pro),
            (PlanId::ProPlus, &self.pro_plus),
        ]
        .into_iter()
        .find_map(|(plan, e)| (e.stripe_price_id.as_deref() == Some(price_id)).then_some(plan))
    }
}
