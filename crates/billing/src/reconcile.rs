//! Reconciliation router: turns verified provider events into billing
//! profile state.
//!
//! Every handler is a pure function of `(event, current profile)` applied
//! through the profile store's merge, never an increment. That is what makes
//! redelivery safe: applying the same event twice yields the same profile as
//! applying it once. The journal write is keyed by the provider's event id
//! and happens exactly once per event regardless of outcome.

use std::sync::Arc;

use fileforge_shared::{PlanId, SubscriptionStatus};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::events::{
    BillingEventRecord, CheckoutSessionObject, EventCategory, EventJournal, InvoiceObject,
    SubscriptionObject, WebhookEvent,
};
use crate::identity::{IdentityHints, IdentityResolver, Resolution};
use crate::pricing::PricingConfig;
use crate::profile::{BillingProfile, ProfileStore};

/// Synthetic period granted on checkout completion, pending the
/// authoritative subscription event. If that event never arrives the
/// fallback remains authoritative.
pub const CHECKOUT_FALLBACK_PERIOD_DAYS: i64 = 30;

/// Everything a subscription upsert event contributes to a profile.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionUpdate {
    pub customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub status: SubscriptionStatus,
    pub plan: PlanId,
    pub period_start: Option<OffsetDateTime>,
    pub period_end: Option<OffsetDateTime>,
    pub trial_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
}

/// What a completed checkout grants.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutGrant {
    pub plan: PlanId,
    pub customer_id: Option<String>,
}

fn ts(unix: Option<i64>) -> Option<OffsetDateTime> {
    unix.and_then(|t| OffsetDateTime::from_unix_timestamp(t).ok())
}

/// Customer ids are immutable once set; only an absent link may be filled.
fn merge_customer_id(current: Option<String>, incoming: Option<&str>) -> Option<String> {
    current.or_else(|| incoming.map(str::to_string))
}

/// Checkout completion: unconditional grant of access.
///
/// A missing profile gets a synthetic fallback period (`now -> now+30d`)
/// that the authoritative subscription upsert is expected to correct.
/// Checkout never downgrades: a plan below the currently stored one is kept
/// at the stored rank.
pub fn apply_checkout_completed(
    user_id: &str,
    current: Option<BillingProfile>,
    grant: &CheckoutGrant,
    now: OffsetDateTime,
) -> BillingProfile {
    let mut profile =
        current.unwrap_or_else(|| BillingProfile::default_free(user_id, now));

    if grant.plan.rank() > profile.plan_id.rank() {
        profile.plan_id = grant.plan;
    }
    profile.status = SubscriptionStatus::Active;
    profile.external_customer_id =
        merge_customer_id(profile.external_customer_id.take(), grant.customer_id.as_deref());
    profile.cancel_at_period_end = false;

    if profile.current_period_end.is_none() {
        profile.current_period_start = Some(now);
        profile.current_period_end = Some(now + Duration::days(CHECKOUT_FALLBACK_PERIOD_DAYS));
    }
    profile.updated_at = now;
    profile
}

/// Subscription created/updated: the authoritative state sync.
///
/// Period fields obey the monotonic invariant: an event whose period end
/// precedes the stored one is out-of-order delivery, so the stored period
/// fields win while status, plan, and the cancellation flag still apply.
pub fn apply_subscription_upsert(
    user_id: &str,
    current: Option<BillingProfile>,
    update: &SubscriptionUpdate,
    now: OffsetDateTime,
) -> BillingProfile {
    let mut profile =
        current.unwrap_or_else(|| BillingProfile::default_free(user_id, now));

    let regressed = matches!(
        (update.period_end, profile.current_period_end),
        (Some(incoming), Some(stored)) if incoming < stored
    );
    if regressed {
        tracing::info!(
            user_id = %user_id,
            "Out-of-order subscription event; keeping stored period bounds"
        );
    } else {
        profile.current_period_start = update.period_start.or(profile.current_period_start);
        profile.current_period_end = update.period_end.or(profile.current_period_end);
    }

    profile.plan_id = update.plan;
    profile.status = update.status;
    profile.cancel_at_period_end = update.cancel_at_period_end;
    profile.trial_end = update.trial_end;
    profile.external_customer_id =
        merge_customer_id(profile.external_customer_id.take(), update.customer_id.as_deref());

    if profile.plan_id == PlanId::Free {
        // Free steady state carries no period bounds.
        profile.current_period_start = None;
        profile.current_period_end = None;
    }
    profile.updated_at = now;
    profile
}

/// Subscription deleted: unconditional downgrade, no precondition.
pub fn apply_subscription_removed(
    user_id: &str,
    current: Option<BillingProfile>,
    now: OffsetDateTime,
) -> BillingProfile {
    let mut profile =
        current.unwrap_or_else(|| BillingProfile::default_free(user_id, now));

    profile.plan_id = PlanId::Free;
    profile.status = SubscriptionStatus::Canceled;
    profile.cancel_at_period_end = false;
    profile.current_period_start = None;
    profile.current_period_end = None;
    profile.trial_end = None;
    profile.updated_at = now;
    profile
}

/// Manual admin plan change.
pub fn apply_manual_change(
    user_id: &str,
    current: Option<BillingProfile>,
    plan: PlanId,
    now: OffsetDateTime,
) -> BillingProfile {
    let mut profile =
        current.unwrap_or_else(|| BillingProfile::default_free(user_id, now));

    profile.plan_id = plan;
    if plan == PlanId::Free {
        profile.status = SubscriptionStatus::Free;
        profile.current_period_start = None;
        profile.current_period_end = None;
    } else {
        profile.status = SubscriptionStatus::Active;
    }
    profile.cancel_at_period_end = false;
    profile.updated_at = now;
    profile
}

/// Dispatches verified events to their handlers and journals every one of
/// them exactly once.
pub struct ReconciliationRouter {
    profiles: ProfileStore,
    journal: EventJournal,
    identity: IdentityResolver,
    pricing: Arc<PricingConfig>,
}

impl ReconciliationRouter {
    pub fn new(
        profiles: ProfileStore,
        journal: EventJournal,
        identity: IdentityResolver,
        pricing: Arc<PricingConfig>,
    ) -> Self {
        Self {
            profiles,
            journal,
            identity,
            pricing,
        }
    }

    /// Process one verified event end to end.
    ///
    /// Returns `Ok` whenever the event was journaled, including unresolved
    /// identities and unhandled types; the caller answers 200 for those so
    /// the provider stops redelivering. A store failure propagates so the
    /// provider retries the whole event, which is safe because the handlers
    /// are idempotent merges.
    pub async fn handle_event(&self, event: &WebhookEvent) -> BillingResult<()> {
        let category = EventCategory::from_type(&event.event_type);
        let mut record = BillingEventRecord::new(&event.id, &event.event_type, event.created);

        if category == EventCategory::Unhandled {
            tracing::info!(
                event_id = %event.id,
                event_type = %event.event_type,
                "No handler for event type; journaling only"
            );
            record.processed = true;
            return self.journal.record(&record).await;
        }

        let hints = IdentityHints::from_object(&event.data.object);
        record.external_customer_id = hints.customer_id.clone();

        let user_id = match self.identity.resolve(&hints).await? {
            Resolution::Resolved { user_id, source } => {
                tracing::debug!(
                    event_id = %event.id,
                    user_id = %user_id,
                    source = source.as_str(),
                    "Resolved event identity"
                );
                user_id
            }
            Resolution::Unresolved => {
                tracing::warn!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    "Could not resolve event to a user; journaling unprocessed"
                );
                record.processed = false;
                record.error = Some(BillingError::IdentityUnresolved.to_string());
                return self.journal.record(&record).await;
            }
        };
        record.user_id = Some(user_id.clone());

        let outcome = self
            .apply(category, event, &user_id, &mut record)
            .await;

        match &outcome {
            Ok(()) => record.processed = true,
            Err(e) => {
                record.processed = false;
                record.error = Some(e.to_string());
            }
        }
        self.journal.record(&record).await?;
        outcome
    }

    async fn apply(
        &self,
        category: EventCategory,
        event: &WebhookEvent,
        user_id: &str,
        record: &mut BillingEventRecord,
    ) -> BillingResult<()> {
        let now = OffsetDateTime::now_utc();
        match category {
            EventCategory::CheckoutCompleted => {
                let session = CheckoutSessionObject::from_event(event)?;
                let grant = CheckoutGrant {
                    plan: self.checkout_plan(&session),
                    customer_id: session.customer.as_ref().map(|c| c.id().to_string()),
                };
                record.plan_id = Some(grant.plan.as_str().to_string());
                record.external_subscription_id =
                    session.subscription.as_ref().map(|s| s.id().to_string());

                let profile = self
                    .profiles
                    .merge(user_id, |current| {
                        apply_checkout_completed(user_id, current, &grant, now)
                    })
                    .await?;
                record.status = Some(profile.status.as_str().to_string());

                tracing::info!(
                    user_id = %user_id,
                    plan = %profile.plan_id,
                    "Checkout completed; access granted with fallback period"
                );
                Ok(())
            }
            EventCategory::SubscriptionUpsert => {
                let subscription = SubscriptionObject::from_event(event)?;
                let update = self.subscription_update(&subscription);
                record.plan_id = Some(update.plan.as_str().to_string());
                record.status = Some(update.status.as_str().to_string());
                record.external_subscription_id = subscription.id.clone();

                let profile = self
                    .profiles
                    .merge(user_id, |current| {
                        apply_subscription_upsert(user_id, current, &update, now)
                    })
                    .await?;

                tracing::info!(
                    user_id = %user_id,
                    plan = %profile.plan_id,
                    status = %profile.status,
                    "Subscription state synced"
                );
                Ok(())
            }
            EventCategory::SubscriptionRemoved => {
                let subscription = SubscriptionObject::from_event(event)?;
                record.external_subscription_id = subscription.id.clone();
                record.plan_id = Some(PlanId::Free.as_str().to_string());
                record.status = Some(SubscriptionStatus::Canceled.as_str().to_string());

                self.profiles
                    .merge(user_id, |current| {
                        apply_subscription_removed(user_id, current, now)
                    })
                    .await?;

                tracing::info!(user_id = %user_id, "Subscription removed; downgraded to free");
                Ok(())
            }
            EventCategory::InvoiceSettled | EventCategory::InvoiceFailed => {
                // Audit-only: profile convergence arrives via the
                // subscription upsert, never via invoices.
                let invoice = InvoiceObject::from_event(event)?;
                record.external_subscription_id =
                    invoice.subscription.as_ref().map(|s| s.id().to_string());
                record.metadata = serde_json::json!({
                    "invoice_id": invoice.id,
                    "amount_paid": invoice.amount_paid,
                    "amount_due": invoice.amount_due,
                    "attempt_count": invoice.attempt_count,
                });

                if category == EventCategory::InvoiceFailed {
                    tracing::warn!(
                        user_id = %user_id,
                        attempt_count = ?invoice.attempt_count,
                        "Invoice payment failed; journaled as escalation signal"
                    );
                }
                Ok(())
            }
            EventCategory::Unhandled => Ok(()),
        }
    }

    /// Plan granted by a checkout session: explicit metadata, else pro.
    fn checkout_plan(&self, session: &CheckoutSessionObject) -> PlanId {
        session
            .metadata
            .get("planId")
            .and_then(|p| PlanId::parse(p))
            .unwrap_or(PlanId::Pro)
    }

    /// Translate a subscription object into an update, resolving the plan
    /// from metadata first, then the price id. A missing or unknown plan
    /// downgrades to free rather than failing the event.
    fn subscription_update(&self, subscription: &SubscriptionObject) -> SubscriptionUpdate {
        let plan = subscription
            .metadata
            .get("planId")
            .and_then(|p| PlanId::parse(p))
            .or_else(|| {
                subscription
                    .price_id()
                    .and_then(|price| self.pricing.plan_for_price(price))
            })
            .unwrap_or_else(|| {
                tracing::warn!(
                    subscription_id = ?subscription.id,
                    price_id = ?subscription.price_id(),
                    "Subscription carries no recognizable plan; downgrading to free"
                );
                PlanId::Free
            });

        let status = subscription
            .status
            .as_deref()
            .map(SubscriptionStatus::from_provider)
            .unwrap_or(SubscriptionStatus::Free);

        SubscriptionUpdate {
            customer_id: subscription.customer.as_ref().map(|c| c.id().to_string()),
            subscription_id: subscription.id.clone(),
            status,
            plan,
            period_start: ts(subscription.current_period_start),
            period_end: ts(subscription.current_period_end),
            trial_end: ts(subscription.trial_end),
            cancel_at_period_end: subscription.cancel_at_period_end,
        }
    }

    /// Admin-initiated plan change, journaled as `manual_upgrade` or
    /// `manual_downgrade` with a synthetic event id.
    pub async fn manual_plan_change(
        &self,
        user_id: &str,
        plan: PlanId,
        actor: &str,
    ) -> BillingResult<BillingProfile> {
        let now = OffsetDateTime::now_utc();
        let previous = self.profiles.get(user_id).await?;
        let event_type = if plan.rank() >= previous.plan_id.rank() {
            "manual_upgrade"
        } else {
            "manual_downgrade"
        };

        let profile = self
            .profiles
            .merge(user_id, |current| {
                apply_manual_change(user_id, current, plan, now)
            })
            .await?;

        let mut record = BillingEventRecord::new(
            format!("manual_{}", Uuid::new_v4()),
            event_type,
            now.unix_timestamp(),
        );
        record.user_id = Some(user_id.to_string());
        record.plan_id = Some(plan.as_str().to_string());
        record.status = Some(profile.status.as_str().to_string());
        record.processed = true;
        record.metadata = serde_json::json!({ "actor": actor });
        self.journal.record(&record).await?;

        tracing::info!(
            user_id = %user_id,
            plan = %plan,
            actor = %actor,
            "Manual plan change applied"
        );
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2026-03-01 12:00 UTC);

    fn pro_update(period_end: OffsetDateTime) -> SubscriptionUpdate {
        SubscriptionUpdate {
            customer_id: Some("cus_1".to_string()),
            subscription_id: Some("sub_1".to_string()),
            status: SubscriptionStatus::Active,
            plan: PlanId::Pro,
            period_start: Some(period_end - Duration::days(30)),
            period_end: Some(period_end),
            trial_end: None,
            cancel_at_period_end: false,
        }
    }

    #[test]
    fn upsert_is_idempotent() {
        let update = pro_update(datetime!(2026-03-31 0:00 UTC));

        let once = apply_subscription_upsert("u1", None, &update, NOW);
        let twice = apply_subscription_upsert("u1", Some(once.clone()), &update, NOW);
        assert_eq!(once, twice);
    }

    #[test]
    fn removal_is_idempotent() {
        let update = pro_update(datetime!(2026-03-31 0:00 UTC));
        let active = apply_subscription_upsert("u1", None, &update, NOW);

        let once = apply_subscription_removed("u1", Some(active), NOW);
        let twice = apply_subscription_removed("u1", Some(once.clone()), NOW);
        assert_eq!(once, twice);
    }

    #[test]
    fn monotonic_period_keeps_stored_bounds() {
        let t2 = datetime!(2026-04-30 0:00 UTC);
        let current = apply_subscription_upsert("u1", None, &pro_update(t2), NOW);

        // Late-arriving event with an earlier period end and a new status.
        let t1 = datetime!(2026-03-31 0:00 UTC);
        let mut stale = pro_update(t1);
        stale.status = SubscriptionStatus::PastDue;
        stale.cancel_at_period_end = true;

        let merged = apply_subscription_upsert("u1", Some(current), &stale, NOW);
        assert_eq!(merged.current_period_end, Some(t2));
        // Non-period fields still apply.
        assert_eq!(merged.status, SubscriptionStatus::PastDue);
        assert!(merged.cancel_at_period_end);
    }

    #[test]
    fn equal_period_end_is_not_a_regression() {
        let t = datetime!(2026-03-31 0:00 UTC);
        let current = apply_subscription_upsert("u1", None, &pro_update(t), NOW);
        let merged = apply_subscription_upsert("u1", Some(current.clone()), &pro_update(t), NOW);
        assert_eq!(merged.current_period_end, current.current_period_end);
    }

    #[test]
    fn unconditional_downgrade_on_removal() {
        let mut profile = apply_subscription_upsert(
            "u1",
            None,
            &pro_update(datetime!(2026-03-31 0:00 UTC)),
            NOW,
        );
        profile.plan_id = PlanId::ProPlus;

        let removed = apply_subscription_removed("u1", Some(profile), NOW);
        assert_eq!(removed.plan_id, PlanId::Free);
        assert_eq!(removed.status, SubscriptionStatus::Canceled);
        assert!(!removed.cancel_at_period_end);
        assert!(removed.current_period_end.is_none());
    }

    #[test]
    fn checkout_creates_fallback_period() {
        let grant = CheckoutGrant {
            plan: PlanId::Pro,
            customer_id: Some("cus_1".to_string()),
        };
        let profile = apply_checkout_completed("u1", None, &grant, NOW);

        assert_eq!(profile.plan_id, PlanId::Pro);
        assert_eq!(profile.status, SubscriptionStatus::Active);
        assert_eq!(profile.current_period_start, Some(NOW));
        assert_eq!(
            profile.current_period_end,
            Some(NOW + Duration::days(CHECKOUT_FALLBACK_PERIOD_DAYS))
        );
    }

    #[test]
    fn checkout_never_downgrades() {
        let plus = apply_subscription_upsert(
            "u1",
            None,
            &SubscriptionUpdate {
                plan: PlanId::ProPlus,
                ..pro_update(datetime!(2026-03-31 0:00 UTC))
            },
            NOW,
        );

        let grant = CheckoutGrant {
            plan: PlanId::Pro,
            customer_id: None,
        };
        let merged = apply_checkout_completed("u1", Some(plus), &grant, NOW);
        assert_eq!(merged.plan_id, PlanId::ProPlus);
    }

    #[test]
    fn checkout_keeps_existing_period_bounds() {
        let t = datetime!(2026-04-15 0:00 UTC);
        let current = apply_subscription_upsert("u1", None, &pro_update(t), NOW);

        let grant = CheckoutGrant {
            plan: PlanId::Pro,
            customer_id: None,
        };
        let merged = apply_checkout_completed("u1", Some(current), &grant, NOW);
        assert_eq!(merged.current_period_end, Some(t));
    }

    #[test]
    fn customer_id_is_upgraded_only_from_absent() {
        let grant_a = CheckoutGrant {
            plan: PlanId::Pro,
            customer_id: Some("cus_a".to_string()),
        };
        let profile = apply_checkout_completed("u1", None, &grant_a, NOW);
        assert_eq!(profile.external_customer_id.as_deref(), Some("cus_a"));

        let grant_b = CheckoutGrant {
            plan: PlanId::Pro,
            customer_id: Some("cus_b".to_string()),
        };
        let merged = apply_checkout_completed("u1", Some(profile), &grant_b, NOW);
        assert_eq!(merged.external_customer_id.as_deref(), Some("cus_a"));
    }

    #[test]
    fn free_upsert_clears_period_bounds() {
        let active = apply_subscription_upsert(
            "u1",
            None,
            &pro_update(datetime!(2026-03-31 0:00 UTC)),
            NOW,
        );

        let downgrade = SubscriptionUpdate {
            plan: PlanId::Free,
            status: SubscriptionStatus::Canceled,
            ..pro_update(datetime!(2026-04-30 0:00 UTC))
        };
        let merged = apply_subscription_upsert("u1", Some(active), &downgrade, NOW);
        assert_eq!(merged.plan_id, PlanId::Free);
        // Transient canceled status with a free plan is permitted.
        assert_eq!(merged.status, SubscriptionStatus::Canceled);
        assert!(merged.current_period_start.is_none());
        assert!(merged.current_period_end.is_none());
    }

    #[test]
    fn manual_change_to_free_clears_bounds() {
        let active = apply_subscription_upsert(
            "u1",
            None,
            &pro_update(datetime!(2026-03-31 0:00 UTC)),
            NOW,
        );
        let freed = apply_manual_change("u1", Some(active), PlanId::Free, NOW);
        assert_eq!(freed.plan_id, PlanId::Free);
        assert_eq!(freed.status, SubscriptionStatus::Free);
        assert!(freed.current_period_end.is_none());
    }
}
