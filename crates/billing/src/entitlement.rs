//! Entitlement decisions: "can this user perform operation X right now?"
//!
//! Everything here is a pure computation over an already-loaded profile and
//! usage record plus the immutable pricing config. No I/O, no suspension
//! points; safe to call from any concurrent request path.

use std::sync::Arc;

use fileforge_shared::{PlanId, SubscriptionStatus};
use serde::Serialize;
use time::{Duration, OffsetDateTime};

use crate::pricing::{PlanEntitlements, PricingConfig};
use crate::profile::BillingProfile;
use crate::usage::UsageRecord;

pub const DEFAULT_GRACE_PERIOD_DAYS: i64 = 3;

/// A yes/no-plus-reason answer about one operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_usage: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    pub requires_upgrade: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_plan: Option<PlanId>,
}

impl Decision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            current_usage: None,
            limit: None,
            requires_upgrade: false,
            suggested_plan: None,
        }
    }

    fn deny_with_upgrade(reason: String, current_plan: PlanId) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            current_usage: None,
            limit: None,
            requires_upgrade: true,
            suggested_plan: Some(suggest_upgrade(current_plan)),
        }
    }
}

/// Upgrade path: free users are pointed at pro, everyone else at pro_plus.
fn suggest_upgrade(current: PlanId) -> PlanId {
    match current {
        PlanId::Free => PlanId::Pro,
        PlanId::Pro | PlanId::ProPlus => PlanId::ProPlus,
    }
}

/// Pure entitlement computation layer.
#[derive(Clone)]
pub struct EntitlementsResolver {
    pricing: Arc<PricingConfig>,
    grace_period: Duration,
}

impl EntitlementsResolver {
    pub fn new(pricing: Arc<PricingConfig>, grace_period_days: i64) -> Self {
        Self {
            pricing,
            grace_period: Duration::days(grace_period_days),
        }
    }

    pub fn entitlements_for(&self, plan: PlanId) -> &PlanEntitlements {
        self.pricing.entitlements_for(plan)
    }

    /// Whether the profile's subscription grants access at `now`.
    ///
    /// Free is always active. Paid plans require a healthy status and, when
    /// a period end is known, `now <= period_end + grace`. The grace period
    /// tolerates the lag between a period lapsing and the corrective webhook
    /// arriving; without it a paying user would be denied service for that
    /// window.
    pub fn is_subscription_active(&self, profile: &BillingProfile, now: OffsetDateTime) -> bool {
        if profile.plan_id == PlanId::Free {
            return true;
        }
        if !matches!(
            profile.status,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing
        ) {
            return false;
        }
        match profile.current_period_end {
            Some(period_end) => now <= period_end + self.grace_period,
            None => true,
        }
    }

    pub fn can_perform_heavy_op(&self, profile: &BillingProfile, usage: &UsageRecord) -> Decision {
        let entitlements = self.entitlements_for(profile.plan_id);
        let limit = entitlements.heavy_ops_per_day;

        if usage.heavy_ops < limit {
            return Decision {
                current_usage: Some(usage.heavy_ops),
                limit: Some(limit),
                ..Decision::allow()
            };
        }

        Decision {
            current_usage: Some(usage.heavy_ops),
            limit: Some(limit),
            ..Decision::deny_with_upgrade(
                format!("Daily heavy operation limit of {limit} reached"),
                profile.plan_id,
            )
        }
    }

    pub fn can_perform_light_op(&self, profile: &BillingProfile, usage: &UsageRecord) -> Decision {
        let entitlements = self.entitlements_for(profile.plan_id);
        let limit = entitlements.light_ops_per_day;

        if usage.light_ops < limit {
            return Decision {
                current_usage: Some(usage.light_ops),
                limit: Some(limit),
                ..Decision::allow()
            };
        }

        Decision {
            current_usage: Some(usage.light_ops),
            limit: Some(limit),
            ..Decision::deny_with_upgrade(
                format!("Daily operation limit of {limit} reached"),
                profile.plan_id,
            )
        }
    }

    pub fn can_process_file_size(&self, profile: &BillingProfile, size_bytes: i64) -> Decision {
        let limit = self.entitlements_for(profile.plan_id).max_file_size_bytes;

        if size_bytes <= limit {
            return Decision {
                current_usage: Some(size_bytes),
                limit: Some(limit),
                ..Decision::allow()
            };
        }

        Decision {
            current_usage: Some(size_bytes),
            limit: Some(limit),
            ..Decision::deny_with_upgrade(
                format!("File exceeds the {limit}-byte limit for this plan"),
                profile.plan_id,
            )
        }
    }

    pub fn can_process_batch_size(&self, profile: &BillingProfile, batch_size: i64) -> Decision {
        let limit = self.entitlements_for(profile.plan_id).max_batch_size;

        if batch_size <= limit {
            return Decision {
                current_usage: Some(batch_size),
                limit: Some(limit),
                ..Decision::allow()
            };
        }

        Decision {
            current_usage: Some(batch_size),
            limit: Some(limit),
            ..Decision::deny_with_upgrade(
                format!("Batch exceeds the {limit}-file limit for this plan"),
                profile.plan_id,
            )
        }
    }

    pub fn can_access_tool(&self, profile: &BillingProfile, tool_id: &str) -> Decision {
        let entitlements = self.entitlements_for(profile.plan_id);

        if entitlements.restricted_tools.iter().any(|t| t == tool_id) {
            return Decision::deny_with_upgrade(
                format!("Tool '{tool_id}' is not available on this plan"),
                profile.plan_id,
            );
        }
        Decision::allow()
    }
}
