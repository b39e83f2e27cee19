//! Identity resolution: mapping a provider event to exactly one internal
//! user id.
//!
//! Events carry up to four identity hints, tried in strict priority order:
//!
//! 1. `metadata.userId` — the id we attach at checkout-session creation.
//! 2. `metadata.firebaseUid` — legacy key for the same concept.
//! 3. `client_reference_id` — present only on checkout sessions.
//! 4. the nested customer: an expanded customer object's
//!    `metadata.firebaseUserId`/`metadata.uid`, else a stored
//!    `external_customer_id -> user_id` association.
//!
//! If all four fail the event is journaled unprocessed and never retried
//! automatically; the hints do not change without upstream intervention, so
//! retrying cannot help.

use serde_json::Value;

use crate::client::StripeClient;
use crate::error::BillingResult;
use crate::profile::ProfileStore;

/// Which strategy produced the user id. Kept on the resolution for
/// journaling and for the write-back decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintSource {
    MetadataUserId,
    MetadataLegacyUid,
    ClientReferenceId,
    CustomerMetadata,
    CustomerLookup,
}

impl HintSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            HintSource::MetadataUserId => "metadata.userId",
            HintSource::MetadataLegacyUid => "metadata.firebaseUid",
            HintSource::ClientReferenceId => "client_reference_id",
            HintSource::CustomerMetadata => "customer.metadata",
            HintSource::CustomerLookup => "customer_lookup",
        }
    }
}

/// Identity hints pulled out of an event object. Pure extraction, no I/O.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentityHints {
    pub metadata_user_id: Option<String>,
    pub metadata_legacy_uid: Option<String>,
    pub client_reference_id: Option<String>,
    pub customer_metadata_uid: Option<String>,
    pub customer_id: Option<String>,
}

fn non_empty(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl IdentityHints {
    /// Extract hints from a raw event object (subscription, checkout
    /// session, or invoice; absent fields just yield no hint).
    pub fn from_object(object: &Value) -> Self {
        let metadata = object.get("metadata");
        let customer = object.get("customer");

        let customer_id = match customer {
            Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
            Some(Value::Object(c)) => non_empty(c.get("id")),
            _ => None,
        };
        let customer_metadata_uid = match customer {
            Some(Value::Object(c)) => {
                let meta = c.get("metadata");
                non_empty(meta.and_then(|m| m.get("firebaseUserId")))
                    .or_else(|| non_empty(meta.and_then(|m| m.get("uid"))))
            }
            _ => None,
        };

        Self {
            metadata_user_id: non_empty(metadata.and_then(|m| m.get("userId"))),
            metadata_legacy_uid: non_empty(metadata.and_then(|m| m.get("firebaseUid"))),
            client_reference_id: non_empty(object.get("client_reference_id")),
            customer_metadata_uid,
            customer_id,
        }
    }

    /// The highest-priority hint that resolves without touching storage.
    pub fn direct(&self) -> Option<(&str, HintSource)> {
        if let Some(id) = self.metadata_user_id.as_deref() {
            return Some((id, HintSource::MetadataUserId));
        }
        if let Some(id) = self.metadata_legacy_uid.as_deref() {
            return Some((id, HintSource::MetadataLegacyUid));
        }
        if let Some(id) = self.client_reference_id.as_deref() {
            return Some((id, HintSource::ClientReferenceId));
        }
        if let Some(id) = self.customer_metadata_uid.as_deref() {
            return Some((id, HintSource::CustomerMetadata));
        }
        None
    }
}

/// Outcome of identity resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved { user_id: String, source: HintSource },
    /// Permanent failure, not a timeout: the event's hints will not change
    /// on redelivery.
    Unresolved,
}

pub struct IdentityResolver {
    profiles: ProfileStore,
    stripe: Option<StripeClient>,
}

impl IdentityResolver {
    pub fn new(profiles: ProfileStore, stripe: Option<StripeClient>) -> Self {
        Self { profiles, stripe }
    }

    /// Resolve hints to a user id, falling back to the stored customer
    /// association as the last resort.
    pub async fn resolve(&self, hints: &IdentityHints) -> BillingResult<Resolution> {
        if let Some((user_id, source)) = hints.direct() {
            return Ok(Resolution::Resolved {
                user_id: user_id.to_string(),
                source,
            });
        }

        let Some(customer_id) = hints.customer_id.as_deref() else {
            return Ok(Resolution::Unresolved);
        };

        match self.profiles.find_user_by_customer(customer_id).await? {
            Some(user_id) => {
                self.write_back(customer_id, &user_id).await;
                Ok(Resolution::Resolved {
                    user_id,
                    source: HintSource::CustomerLookup,
                })
            }
            None => Ok(Resolution::Unresolved),
        }
    }

    /// Annotate the provider's customer record with the resolved user id so
    /// future events resolve via the metadata hint. Best-effort: a failure
    /// here never fails the resolution.
    async fn write_back(&self, customer_id: &str, user_id: &str) {
        let Some(stripe) = &self.stripe else { return };

        if let Err(e) = stripe.annotate_customer_user_id(customer_id, user_id).await {
            tracing::warn!(
                customer_id = %customer_id,
                error = %e,
                "Identity write-back to customer metadata failed"
            );
        } else {
            tracing::info!(
                customer_id = %customer_id,
                "Annotated customer metadata with resolved user id"
            );
        }
    }
}
