//! Plan and subscription status vocabulary shared across services.

use serde::{Deserialize, Serialize};

/// Entitlement tier a user is billed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanId {
    Free,
    Pro,
    ProPlus,
}

impl PlanId {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanId::Free => "free",
            PlanId::Pro => "pro",
            PlanId::ProPlus => "pro_plus",
        }
    }

    /// Parse a plan id string. Unknown plans return `None`; callers decide
    /// whether that means "downgrade to free" (webhook path) or "reject"
    /// (admin path).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "free" => Some(PlanId::Free),
            "pro" => Some(PlanId::Pro),
            "pro_plus" => Some(PlanId::ProPlus),
            _ => None,
        }
    }

    /// Ordering used for "never downgrade" decisions on checkout completion.
    pub fn rank(&self) -> u8 {
        match self {
            PlanId::Free => 0,
            PlanId::Pro => 1,
            PlanId::ProPlus => 2,
        }
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Internal subscription status vocabulary.
///
/// Mirrors the payment processor's statuses 1:1 plus a `free` steady state
/// for users with no subscription at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Unpaid,
    Incomplete,
    IncompleteExpired,
    Free,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Unpaid => "unpaid",
            SubscriptionStatus::Incomplete => "incomplete",
            SubscriptionStatus::IncompleteExpired => "incomplete_expired",
            SubscriptionStatus::Free => "free",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SubscriptionStatus::Active),
            "trialing" => Some(SubscriptionStatus::Trialing),
            "past_due" => Some(SubscriptionStatus::PastDue),
            "canceled" => Some(SubscriptionStatus::Canceled),
            "unpaid" => Some(SubscriptionStatus::Unpaid),
            "incomplete" => Some(SubscriptionStatus::Incomplete),
            "incomplete_expired" => Some(SubscriptionStatus::IncompleteExpired),
            "free" => Some(SubscriptionStatus::Free),
            _ => None,
        }
    }

    /// Map the processor's status vocabulary onto ours. Anything we do not
    /// recognize maps to `Free` rather than failing the event.
    pub fn from_provider(s: &str) -> Self {
        Self::parse(s).unwrap_or(SubscriptionStatus::Free)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
