// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Billing Engine
//!
//! Cross-module scenario tests for boundary conditions in:
//! - Event delivery (BILL-E01 to BILL-E07)
//! - Identity resolution (BILL-I01 to BILL-I04)
//! - Entitlements and grace arithmetic (BILL-G01 to BILL-G05)
//! - Webhook verification (BILL-W01 to BILL-W04)

#[cfg(test)]
mod event_delivery_tests {
    use crate::profile::BillingProfile;
    use crate::reconcile::*;
    use fileforge_shared::{PlanId, SubscriptionStatus};
    use time::macros::datetime;
    use time::{Duration, OffsetDateTime};

    const NOW: OffsetDateTime = datetime!(2026-05-01 9:00 UTC);

    fn upsert(plan: PlanId, status: SubscriptionStatus, end: OffsetDateTime) -> SubscriptionUpdate {
        SubscriptionUpdate {
            customer_id: Some("cus_edge".to_string()),
            subscription_id: Some("sub_edge".to_string()),
            status,
            plan,
            period_start: Some(end - Duration::days(30)),
            period_end: Some(end),
            trial_end: None,
            cancel_at_period_end: false,
        }
    }

    // =========================================================================
    // BILL-E01: checkout then authoritative upsert - upsert corrects the
    // synthetic fallback bounds
    // =========================================================================
    #[test]
    fn test_authoritative_upsert_corrects_fallback_period() {
        let grant = CheckoutGrant {
            plan: PlanId::Pro,
            customer_id: Some("cus_edge".to_string()),
        };
        let fallback = apply_checkout_completed("u1", None, &grant, NOW);
        let fallback_end = fallback.current_period_end.unwrap();

        // The real subscription period ends later than the synthetic 30 days.
        let real_end = NOW + Duration::days(31);
        let update = upsert(PlanId::Pro, SubscriptionStatus::Active, real_end);
        let corrected = apply_subscription_upsert("u1", Some(fallback), &update, NOW);

        assert!(fallback_end < real_end);
        assert_eq!(corrected.current_period_end, Some(real_end));
    }

    // =========================================================================
    // BILL-E02: upsert delivered before checkout - the later checkout must
    // not clobber the authoritative bounds or downgrade the plan
    // =========================================================================
    #[test]
    fn test_late_checkout_does_not_clobber_authoritative_state() {
        let real_end = NOW + Duration::days(30);
        let update = upsert(PlanId::ProPlus, SubscriptionStatus::Active, real_end);
        let authoritative = apply_subscription_upsert("u1", None, &update, NOW);

        let grant = CheckoutGrant {
            plan: PlanId::Pro,
            customer_id: Some("cus_edge".to_string()),
        };
        let merged = apply_checkout_completed("u1", Some(authoritative), &grant, NOW);

        assert_eq!(merged.plan_id, PlanId::ProPlus);
        assert_eq!(merged.current_period_end, Some(real_end));
    }

    // =========================================================================
    // BILL-E03: full out-of-order pair - renewal then the stale previous
    // period event; period keeps the renewal, status applies from the stale
    // event
    // =========================================================================
    #[test]
    fn test_out_of_order_renewal_pair() {
        let old_end = datetime!(2026-05-31 0:00 UTC);
        let new_end = datetime!(2026-06-30 0:00 UTC);

        let renewal = upsert(PlanId::Pro, SubscriptionStatus::Active, new_end);
        let profile = apply_subscription_upsert("u1", None, &renewal, NOW);

        let stale = upsert(PlanId::Pro, SubscriptionStatus::PastDue, old_end);
        let merged = apply_subscription_upsert("u1", Some(profile), &stale, NOW);

        assert_eq!(merged.current_period_end, Some(new_end));
        assert_eq!(merged.status, SubscriptionStatus::PastDue);
    }

    // =========================================================================
    // BILL-E04: removal replayed after re-subscribe ordering - removal is
    // unconditional either way
    // =========================================================================
    #[test]
    fn test_removal_always_wins_when_applied_last() {
        let end = NOW + Duration::days(30);
        let update = upsert(PlanId::ProPlus, SubscriptionStatus::Active, end);
        let active = apply_subscription_upsert("u1", None, &update, NOW);

        let removed = apply_subscription_removed("u1", Some(active), NOW);
        assert_eq!(removed.plan_id, PlanId::Free);
        assert_eq!(removed.status, SubscriptionStatus::Canceled);

        // Replay of the removal is a no-op.
        let replayed = apply_subscription_removed("u1", Some(removed.clone()), NOW);
        assert_eq!(removed, replayed);
    }

    // =========================================================================
    // BILL-E05: three-event replay storm - any number of identical upserts
    // converges to the single-application state
    // =========================================================================
    #[test]
    fn test_replay_storm_converges() {
        let update = upsert(PlanId::Pro, SubscriptionStatus::Active, NOW + Duration::days(30));

        let mut profile = apply_subscription_upsert("u1", None, &update, NOW);
        let once = profile.clone();
        for _ in 0..5 {
            profile = apply_subscription_upsert("u1", Some(profile), &update, NOW);
        }
        assert_eq!(profile, once);
    }

    // =========================================================================
    // BILL-E06: upsert with unknown status vocabulary maps to free status
    // without touching the plan resolution
    // =========================================================================
    #[test]
    fn test_unknown_status_vocabulary() {
        assert_eq!(SubscriptionStatus::from_provider("paused"), SubscriptionStatus::Free);
        assert_eq!(
            SubscriptionStatus::from_provider("incomplete_expired"),
            SubscriptionStatus::IncompleteExpired
        );
    }

    // =========================================================================
    // BILL-E07: a default free profile is indistinguishable from no profile
    // for every handler - the store seeds one to lock before a user's first
    // event, and that seed must not change any merge outcome
    // =========================================================================
    #[test]
    fn test_seeded_free_profile_equivalent_to_absent() {
        let seeded = BillingProfile::default_free("u1", NOW);

        let grant = CheckoutGrant {
            plan: PlanId::Pro,
            customer_id: Some("cus_edge".to_string()),
        };
        assert_eq!(
            apply_checkout_completed("u1", None, &grant, NOW),
            apply_checkout_completed("u1", Some(seeded.clone()), &grant, NOW)
        );

        let update = upsert(PlanId::Pro, SubscriptionStatus::Active, NOW + Duration::days(30));
        assert_eq!(
            apply_subscription_upsert("u1", None, &update, NOW),
            apply_subscription_upsert("u1", Some(seeded.clone()), &update, NOW)
        );

        assert_eq!(
            apply_subscription_removed("u1", None, NOW),
            apply_subscription_removed("u1", Some(seeded.clone()), NOW)
        );

        assert_eq!(
            apply_manual_change("u1", None, PlanId::Pro, NOW),
            apply_manual_change("u1", Some(seeded), PlanId::Pro, NOW)
        );
    }
}

#[cfg(test)]
mod identity_tests {
    use crate::identity::*;
    use serde_json::json;

    // =========================================================================
    // BILL-I01: all four hints present - highest priority wins
    // =========================================================================
    #[test]
    fn test_full_hint_matrix_priority() {
        let hints = IdentityHints::from_object(&json!({
            "metadata": { "userId": "step1", "firebaseUid": "step2" },
            "client_reference_id": "step3",
            "customer": { "id": "cus_1", "metadata": { "uid": "step4" } }
        }));
        assert_eq!(hints.direct(), Some(("step1", HintSource::MetadataUserId)));
    }

    // =========================================================================
    // BILL-I02: hints removed one at a time - fallback walks the chain in
    // order
    // =========================================================================
    #[test]
    fn test_fallback_chain_order() {
        let without_user_id = IdentityHints::from_object(&json!({
            "metadata": { "firebaseUid": "step2" },
            "client_reference_id": "step3",
            "customer": { "id": "cus_1", "metadata": { "uid": "step4" } }
        }));
        assert_eq!(
            without_user_id.direct(),
            Some(("step2", HintSource::MetadataLegacyUid))
        );

        let without_metadata = IdentityHints::from_object(&json!({
            "client_reference_id": "step3",
            "customer": { "id": "cus_1", "metadata": { "uid": "step4" } }
        }));
        assert_eq!(
            without_metadata.direct(),
            Some(("step3", HintSource::ClientReferenceId))
        );

        let customer_only = IdentityHints::from_object(&json!({
            "customer": { "id": "cus_1", "metadata": { "uid": "step4" } }
        }));
        assert_eq!(
            customer_only.direct(),
            Some(("step4", HintSource::CustomerMetadata))
        );
    }

    // =========================================================================
    // BILL-I03: customer id as a bare string leaves only the store lookup
    // =========================================================================
    #[test]
    fn test_bare_customer_requires_lookup() {
        let hints = IdentityHints::from_object(&json!({
            "metadata": {},
            "customer": "cus_bare"
        }));
        assert_eq!(hints.direct(), None);
        assert_eq!(hints.customer_id.as_deref(), Some("cus_bare"));
    }

    // =========================================================================
    // BILL-I04: non-string metadata values are not identity hints
    // =========================================================================
    #[test]
    fn test_non_string_hints_ignored() {
        let hints = IdentityHints::from_object(&json!({
            "metadata": { "userId": 12345 },
            "client_reference_id": "ref-ok"
        }));
        assert_eq!(hints.direct(), Some(("ref-ok", HintSource::ClientReferenceId)));
    }
}

#[cfg(test)]
mod entitlement_grace_tests {
    use crate::entitlement::*;
    use crate::pricing::PricingConfig;
    use crate::profile::BillingProfile;
    use crate::usage::UsageRecord;
    use fileforge_shared::{PlanId, SubscriptionStatus};
    use std::sync::Arc;
    use time::macros::datetime;
    use time::Duration;

    fn resolver(grace_days: i64) -> EntitlementsResolver {
        EntitlementsResolver::new(Arc::new(PricingConfig::default_plans()), grace_days)
    }

    fn pro_profile() -> BillingProfile {
        let now = datetime!(2026-01-01 0:00 UTC);
        BillingProfile {
            plan_id: PlanId::Pro,
            status: SubscriptionStatus::Active,
            current_period_end: Some(datetime!(2026-02-01 0:00 UTC)),
            ..BillingProfile::default_free("u1", now)
        }
    }

    // =========================================================================
    // BILL-G01: exactly at period_end + grace - still active (inclusive)
    // =========================================================================
    #[test]
    fn test_exactly_at_grace_boundary_is_active() {
        let profile = pro_profile();
        let boundary = profile.current_period_end.unwrap() + Duration::days(3);
        assert!(resolver(3).is_subscription_active(&profile, boundary));
        assert!(!resolver(3).is_subscription_active(&profile, boundary + Duration::seconds(1)));
    }

    // =========================================================================
    // BILL-G02: zero-day grace - active stops at period end
    // =========================================================================
    #[test]
    fn test_zero_grace_period() {
        let profile = pro_profile();
        let end = profile.current_period_end.unwrap();
        assert!(resolver(0).is_subscription_active(&profile, end));
        assert!(!resolver(0).is_subscription_active(&profile, end + Duration::seconds(1)));
    }

    // =========================================================================
    // BILL-G03: past_due inside the grace window is still inactive - grace
    // extends the period, it does not forgive a bad status
    // =========================================================================
    #[test]
    fn test_grace_does_not_forgive_past_due() {
        let mut profile = pro_profile();
        profile.status = SubscriptionStatus::PastDue;
        let inside = profile.current_period_end.unwrap() - Duration::days(1);
        assert!(!resolver(3).is_subscription_active(&profile, inside));
    }

    // =========================================================================
    // BILL-G04: quota boundary at exactly the cap
    // =========================================================================
    #[test]
    fn test_quota_cap_boundary() {
        let resolver = resolver(3);
        let free = BillingProfile::default_free("u1", datetime!(2026-01-01 0:00 UTC));
        let mut usage = UsageRecord::empty("u1", "2026-01-01");

        // Cap is 3: the 3rd op (usage 2) is allowed, the 4th (usage 3) is not.
        usage.heavy_ops = 2;
        assert!(resolver.can_perform_heavy_op(&free, &usage).allowed);
        usage.heavy_ops = 3;
        let denied = resolver.can_perform_heavy_op(&free, &usage);
        assert!(!denied.allowed);
        assert!(denied.requires_upgrade);
        assert_eq!(denied.suggested_plan, Some(PlanId::Pro));
    }

    // =========================================================================
    // BILL-G05: decision carries usage and limit for caller-side messaging
    // =========================================================================
    #[test]
    fn test_decision_shape() {
        let resolver = resolver(3);
        let free = BillingProfile::default_free("u1", datetime!(2026-01-01 0:00 UTC));
        let mut usage = UsageRecord::empty("u1", "2026-01-01");
        usage.heavy_ops = 3;

        let decision = resolver.can_perform_heavy_op(&free, &usage);
        assert_eq!(decision.current_usage, Some(3));
        assert_eq!(decision.limit, Some(3));
        assert!(decision.reason.is_some());
    }
}

#[cfg(test)]
mod webhook_verification_tests {
    use crate::error::BillingError;
    use crate::verify::*;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    const SECRET: &str = "whsec_edge_case_secret";

    fn sign(payload: &[u8], timestamp: i64) -> String {
        let key = SECRET.strip_prefix("whsec_").unwrap();
        let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.").as_bytes());
        mac.update(payload);
        format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn body() -> Vec<u8> {
        serde_json::json!({
            "id": "evt_edge",
            "type": "customer.subscription.updated",
            "created": 1_750_000_000,
            "data": { "object": { "id": "sub_1", "customer": "cus_1" } }
        })
        .to_string()
        .into_bytes()
    }

    // =========================================================================
    // BILL-W01: signature over re-serialized JSON differs from signature
    // over raw bytes - whitespace changes must break verification
    // =========================================================================
    #[test]
    fn test_whitespace_change_breaks_signature() {
        let verifier = WebhookVerifier::new(SECRET);
        let raw = body();
        let now = 1_750_000_000;
        let header = sign(&raw, now);

        // Same JSON, different bytes.
        let mut reserialized = raw.clone();
        reserialized.extend_from_slice(b" ");
        assert!(verifier.verify_at(&reserialized, &header, now).is_err());
        assert!(verifier.verify_at(&raw, &header, now).is_ok());
    }

    // =========================================================================
    // BILL-W02: tolerance boundary at exactly 300 seconds, both directions
    // =========================================================================
    #[test]
    fn test_tolerance_is_symmetric() {
        let verifier = WebhookVerifier::new(SECRET);
        let raw = body();
        let signed_at = 1_750_000_000;
        let header = sign(&raw, signed_at);

        assert!(verifier.verify_at(&raw, &header, signed_at + SIGNATURE_TOLERANCE_SECS).is_ok());
        assert!(verifier.verify_at(&raw, &header, signed_at - SIGNATURE_TOLERANCE_SECS).is_ok());
        assert!(verifier
            .verify_at(&raw, &header, signed_at + SIGNATURE_TOLERANCE_SECS + 1)
            .is_err());
        assert!(verifier
            .verify_at(&raw, &header, signed_at - SIGNATURE_TOLERANCE_SECS - 1)
            .is_err());
    }

    // =========================================================================
    // BILL-W03: v1 signature with the right length but wrong value
    // =========================================================================
    #[test]
    fn test_recomputed_but_wrong_signature() {
        let verifier = WebhookVerifier::new(SECRET);
        let raw = body();
        let now = 1_750_000_000;

        // Signed with the right scheme but a different secret.
        let key = "attacker_guess";
        let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes()).unwrap();
        mac.update(format!("{now}.").as_bytes());
        mac.update(&raw);
        let header = format!("t={now},v1={}", hex::encode(mac.finalize().into_bytes()));

        assert!(matches!(
            verifier.verify_at(&raw, &header, now),
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }

    // =========================================================================
    // BILL-W04: extra unknown header fields are ignored, v0 included
    // =========================================================================
    #[test]
    fn test_extra_header_fields_ignored() {
        let verifier = WebhookVerifier::new(SECRET);
        let raw = body();
        let now = 1_750_000_000;
        let header = format!("{},v0=legacy_ignored,x=1", sign(&raw, now));
        assert!(verifier.verify_at(&raw, &header, now).is_ok());
    }
}
