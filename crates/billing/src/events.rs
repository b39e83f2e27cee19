//! Webhook event model and the append-only audit journal.
//!
//! Events are parsed from the exact bytes the provider sent (the verifier
//! owns that step). The journal is keyed by the provider's event id, which is
//! the natural idempotency key: a redelivered event overwrites its row, it
//! never duplicates.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::error::{BillingError, BillingResult};

/// A verified, parsed provider event.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: i64,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

/// Closed set of event categories the router dispatches on.
///
/// Adding a category is a compile-time exhaustiveness requirement in every
/// match over this enum; genuinely unknown provider types land in
/// `Unhandled` and are journaled without touching any profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventCategory {
    CheckoutCompleted,
    SubscriptionUpsert,
    SubscriptionRemoved,
    InvoiceSettled,
    InvoiceFailed,
    Unhandled,
}

impl EventCategory {
    pub fn from_type(event_type: &str) -> Self {
        match event_type {
            "checkout.session.completed" => EventCategory::CheckoutCompleted,
            "customer.subscription.created" | "customer.subscription.updated" => {
                EventCategory::SubscriptionUpsert
            }
            "customer.subscription.deleted" => EventCategory::SubscriptionRemoved,
            "invoice.paid" | "invoice.payment_succeeded" => EventCategory::InvoiceSettled,
            "invoice.payment_failed" => EventCategory::InvoiceFailed,
            _ => EventCategory::Unhandled,
        }
    }
}

/// `customer` fields arrive either as a bare id or an expanded object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Expandable {
    Id(String),
    Object(CustomerObject),
}

impl Expandable {
    pub fn id(&self) -> &str {
        match self {
            Expandable::Id(id) => id,
            Expandable::Object(c) => &c.id,
        }
    }

    pub fn metadata(&self) -> Option<&HashMap<String, String>> {
        match self {
            Expandable::Id(_) => None,
            Expandable::Object(c) => Some(&c.metadata),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomerObject {
    pub id: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Typed view of a `customer.subscription.*` event object.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionObject {
    pub id: Option<String>,
    pub customer: Option<Expandable>,
    pub status: Option<String>,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    pub trial_end: Option<i64>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub items: Option<SubscriptionItemList>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItemList {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItem {
    pub price: Option<ItemPrice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemPrice {
    pub id: String,
}

impl SubscriptionObject {
    pub fn from_event(event: &WebhookEvent) -> BillingResult<Self> {
        serde_json::from_value(event.data.object.clone())
            .map_err(|e| BillingError::EventNotSupported(format!("expected subscription: {e}")))
    }

    /// First line item's price id, if any.
    pub fn price_id(&self) -> Option<&str> {
        self.items
            .as_ref()
            .and_then(|items| items.data.first())
            .and_then(|item| item.price.as_ref())
            .map(|price| price.id.as_str())
    }
}

/// Typed view of a `checkout.session.completed` event object.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: Option<String>,
    pub customer: Option<Expandable>,
    pub client_reference_id: Option<String>,
    pub subscription: Option<Expandable>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CheckoutSessionObject {
    pub fn from_event(event: &WebhookEvent) -> BillingResult<Self> {
        serde_json::from_value(event.data.object.clone())
            .map_err(|e| BillingError::EventNotSupported(format!("expected checkout session: {e}")))
    }
}

/// Typed view of an `invoice.*` event object.
#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceObject {
    pub id: Option<String>,
    pub customer: Option<Expandable>,
    pub subscription: Option<Expandable>,
    pub amount_paid: Option<i64>,
    pub amount_due: Option<i64>,
    pub attempt_count: Option<i64>,
}

impl InvoiceObject {
    pub fn from_event(event: &WebhookEvent) -> BillingResult<Self> {
        serde_json::from_value(event.data.object.clone())
            .map_err(|e| BillingError::EventNotSupported(format!("expected invoice: {e}")))
    }
}

/// One audit journal row. Write-once-per-id, read-many.
#[derive(Debug, Clone, Serialize)]
pub struct BillingEventRecord {
    pub event_id: String,
    pub event_type: String,
    pub user_id: Option<String>,
    pub external_customer_id: Option<String>,
    pub external_subscription_id: Option<String>,
    pub plan_id: Option<String>,
    pub status: Option<String>,
    pub event_timestamp: i64,
    pub metadata: serde_json::Value,
    pub processed: bool,
    pub error: Option<String>,
}

impl BillingEventRecord {
    pub fn new(event_id: impl Into<String>, event_type: impl Into<String>, timestamp: i64) -> Self {
        Self {
            event_id: event_id.into(),
            event_type: event_type.into(),
            user_id: None,
            external_customer_id: None,
            external_subscription_id: None,
            plan_id: None,
            status: None,
            event_timestamp: timestamp,
            metadata: serde_json::Value::Object(serde_json::Map::new()),
            processed: false,
            error: None,
        }
    }
}

/// Durable audit journal for processor events.
#[derive(Clone)]
pub struct EventJournal {
    pool: PgPool,
}

impl EventJournal {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert a journal row by event id. Retried once on failure since the
    /// audit record is what makes redelivery safe to reason about.
    pub async fn record(&self, record: &BillingEventRecord) -> BillingResult<()> {
        if let Err(first) = self.write(record).await {
            tracing::warn!(
                event_id = %record.event_id,
                error = %first,
                "Journal write failed, retrying once"
            );
            self.write(record).await.map_err(|retry_err| {
                tracing::error!(
                    event_id = %record.event_id,
                    event_type = %record.event_type,
                    error = %retry_err,
                    "Journal write failed after retry; event must be redelivered"
                );
                retry_err
            })?;
        }
        Ok(())
    }

    async fn write(&self, record: &BillingEventRecord) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO billing_events (
                event_id, event_type, user_id, external_customer_id,
                external_subscription_id, plan_id, status, event_timestamp,
                metadata, processed, error, recorded_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW())
            ON CONFLICT (event_id) DO UPDATE SET
                event_type = EXCLUDED.event_type,
                user_id = EXCLUDED.user_id,
                external_customer_id = EXCLUDED.external_customer_id,
                external_subscription_id = EXCLUDED.external_subscription_id,
                plan_id = EXCLUDED.plan_id,
                status = EXCLUDED.status,
                event_timestamp = EXCLUDED.event_timestamp,
                metadata = EXCLUDED.metadata,
                processed = EXCLUDED.processed,
                error = EXCLUDED.error,
                recorded_at = NOW()
            "#,
        )
        .bind(&record.event_id)
        .bind(&record.event_type)
        .bind(&record.user_id)
        .bind(&record.external_customer_id)
        .bind(&record.external_subscription_id)
        .bind(&record.plan_id)
        .bind(&record.status)
        .bind(record.event_timestamp)
        .bind(&record.metadata)
        .bind(record.processed)
        .bind(&record.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
