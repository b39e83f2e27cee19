//! Per-user billing profile and its durable store.
//!
//! All mutation goes through [`ProfileStore::merge`]: a transaction takes a
//! row lock on the user's profile, applies a pure closure to the current
//! state, and upserts the result. That lock is the only exclusivity boundary
//! in the engine; writes for different users never contend.

use fileforge_shared::{PlanId, SubscriptionStatus};
use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::error::BillingResult;

/// The single source of truth for what a user is subscribed to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BillingProfile {
    pub user_id: String,
    /// Identity correlation key from the payment processor. Immutable once
    /// set, except upgraded from absent to present.
    pub external_customer_id: Option<String>,
    pub plan_id: PlanId,
    pub status: SubscriptionStatus,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub trial_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl BillingProfile {
    /// The profile a user has before any billing event ever reached us.
    pub fn default_free(user_id: impl Into<String>, now: OffsetDateTime) -> Self {
        Self {
            user_id: user_id.into(),
            external_customer_id: None,
            plan_id: PlanId::Free,
            status: SubscriptionStatus::Free,
            current_period_start: None,
            current_period_end: None,
            trial_end: None,
            cancel_at_period_end: false,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ProfileRow {
    user_id: String,
    external_customer_id: Option<String>,
    plan_id: String,
    status: String,
    current_period_start: Option<OffsetDateTime>,
    current_period_end: Option<OffsetDateTime>,
    trial_end: Option<OffsetDateTime>,
    cancel_at_period_end: bool,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<ProfileRow> for BillingProfile {
    fn from(row: ProfileRow) -> Self {
        BillingProfile {
            user_id: row.user_id,
            external_customer_id: row.external_customer_id,
            // A plan or status outside the known set in storage reads as
            // free rather than failing every caller.
            plan_id: PlanId::parse(&row.plan_id).unwrap_or(PlanId::Free),
            status: SubscriptionStatus::from_provider(&row.status),
            current_period_start: row.current_period_start,
            current_period_end: row.current_period_end,
            trial_end: row.trial_end,
            cancel_at_period_end: row.cancel_at_period_end,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const SELECT_PROFILE: &str = r#"
    SELECT user_id, external_customer_id, plan_id, status,
           current_period_start, current_period_end, trial_end,
           cancel_at_period_end, created_at, updated_at
    FROM billing_profiles
    WHERE user_id = $1
"#;

/// Durable store for billing profiles.
#[derive(Clone)]
pub struct ProfileStore {
    pool: PgPool,
}

impl ProfileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Load a profile. A missing row reads as the default free profile.
    pub async fn get(&self, user_id: &str) -> BillingResult<BillingProfile> {
        let row: Option<ProfileRow> = sqlx::query_as(SELECT_PROFILE)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(BillingProfile::from).unwrap_or_else(|| {
            BillingProfile::default_free(user_id, OffsetDateTime::now_utc())
        }))
    }

    /// Reverse lookup for identity resolution: which user owns this
    /// processor customer id?
    pub async fn find_user_by_customer(
        &self,
        external_customer_id: &str,
    ) -> BillingResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT user_id FROM billing_profiles WHERE external_customer_id = $1",
        )
        .bind(external_customer_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(user_id,)| user_id))
    }

    /// Atomic read-modify-write for one user's profile.
    ///
    /// The closure sees the currently stored profile (or `None`) and returns
    /// the full next state; the row lock prevents any concurrent writer from
    /// interleaving between the read and the write for the same user.
    pub async fn merge<F>(&self, user_id: &str, apply: F) -> BillingResult<BillingProfile>
    where
        F: FnOnce(Option<BillingProfile>) -> BillingProfile + Send,
    {
        let mut tx = self.pool.begin().await?;

        // `FOR UPDATE` takes no lock on an absent row, so two first-ever
        // events for a user could both read nothing and overwrite each
        // other. Seed a default free row first; the select below then
        // always finds a row to lock. The seed is indistinguishable from
        // no row to every merge closure.
        sqlx::query(
            "INSERT INTO billing_profiles (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        let current: Option<ProfileRow> =
            sqlx::query_as(&format!("{SELECT_PROFILE} FOR UPDATE"))
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;

        let next = apply(current.map(BillingProfile::from));

        sqlx::query(
            r#"
            INSERT INTO billing_profiles (
                user_id, external_customer_id, plan_id, status,
                current_period_start, current_period_end, trial_end,
                cancel_at_period_end, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (user_id) DO UPDATE SET
                external_customer_id = EXCLUDED.external_customer_id,
                plan_id = EXCLUDED.plan_id,
                status = EXCLUDED.status,
                current_period_start = EXCLUDED.current_period_start,
                current_period_end = EXCLUDED.current_period_end,
                trial_end = EXCLUDED.trial_end,
                cancel_at_period_end = EXCLUDED.cancel_at_period_end,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&next.user_id)
        .bind(&next.external_customer_id)
        .bind(next.plan_id.as_str())
        .bind(next.status.as_str())
        .bind(next.current_period_start)
        .bind(next.current_period_end)
        .bind(next.trial_end)
        .bind(next.cancel_at_period_end)
        .bind(next.created_at)
        .bind(next.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(next)
    }
}
