//! Runnable consistency checks for the billing tables.
//!
//! Each invariant is a real SQL query; checks only read, never write. Run
//! after webhook replays or manual remediation to confirm the system is in a
//! valid state.

use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::error::BillingResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ViolationSeverity {
    /// Users may be granted or denied access incorrectly.
    Critical,
    /// Data inconsistency that needs attention.
    High,
    /// Should be investigated; access decisions unaffected.
    Medium,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InvariantViolation {
    pub invariant: String,
    pub user_ids: Vec<String>,
    pub description: String,
    pub severity: ViolationSeverity,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvariantCheckSummary {
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let mut violations = Vec::new();
        let mut checks_run = 0;

        checks_run += 1;
        if let Some(v) = self.check_free_with_period_bounds().await? {
            violations.push(v);
        }
        checks_run += 1;
        if let Some(v) = self.check_paid_without_customer().await? {
            violations.push(v);
        }
        checks_run += 1;
        if let Some(v) = self.check_inverted_period_bounds().await? {
            violations.push(v);
        }
        checks_run += 1;
        if let Some(v) = self.check_unprocessed_events().await? {
            violations.push(v);
        }

        let summary = InvariantCheckSummary {
            checked_at: OffsetDateTime::now_utc(),
            checks_run,
            checks_passed: checks_run - violations.len(),
            healthy: violations.is_empty(),
            violations,
        };

        if summary.healthy {
            tracing::info!(checks_run = summary.checks_run, "All billing invariants hold");
        } else {
            tracing::warn!(
                violations = summary.violations.len(),
                "Billing invariant violations detected"
            );
        }
        Ok(summary)
    }

    /// Free plan rows must not carry period bounds in the steady state.
    async fn check_free_with_period_bounds(&self) -> BillingResult<Option<InvariantViolation>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT user_id FROM billing_profiles
            WHERE plan_id = 'free'
              AND (current_period_start IS NOT NULL OR current_period_end IS NOT NULL)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(violation(
            rows,
            "free_plan_period_bounds",
            "Free-plan profiles carrying period bounds",
            ViolationSeverity::Medium,
        ))
    }

    /// Paid plans normally arrive via the processor and carry a customer
    /// link. Manual upgrades are the known exception, hence High rather
    /// than Critical.
    async fn check_paid_without_customer(&self) -> BillingResult<Option<InvariantViolation>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT user_id FROM billing_profiles
            WHERE plan_id <> 'free' AND external_customer_id IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(violation(
            rows,
            "paid_plan_without_customer",
            "Paid profiles with no external customer link",
            ViolationSeverity::High,
        ))
    }

    /// Period start must not follow period end.
    async fn check_inverted_period_bounds(&self) -> BillingResult<Option<InvariantViolation>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT user_id FROM billing_profiles
            WHERE current_period_start IS NOT NULL
              AND current_period_end IS NOT NULL
              AND current_period_start > current_period_end
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(violation(
            rows,
            "inverted_period_bounds",
            "Profiles whose period start follows its end",
            ViolationSeverity::Critical,
        ))
    }

    /// Unprocessed journal rows older than a day are events stuck waiting
    /// for manual remediation.
    async fn check_unprocessed_events(&self) -> BillingResult<Option<InvariantViolation>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT event_id FROM billing_events
            WHERE processed = FALSE
              AND recorded_at < NOW() - INTERVAL '1 day'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(violation(
            rows,
            "stale_unprocessed_events",
            "Journal rows unprocessed for more than a day",
            ViolationSeverity::High,
        ))
    }
}

fn violation(
    rows: Vec<(String,)>,
    invariant: &str,
    description: &str,
    severity: ViolationSeverity,
) -> Option<InvariantViolation> {
    if rows.is_empty() {
        return None;
    }
    Some(InvariantViolation {
        invariant: invariant.to_string(),
        user_ids: rows.into_iter().map(|(id,)| id).collect(),
        description: description.to_string(),
        severity,
    })
}
