//! Per-user, per-UTC-day usage counters.
//!
//! There is no reset job: the day key partitions records naturally, so
//! "reset" is just selecting the next day's key. Rows are created lazily on
//! the first operation of the day and never deleted.

use serde::Serialize;
use sqlx::PgPool;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::error::BillingResult;

/// One user's counters for one UTC calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageRecord {
    pub user_id: String,
    /// yyyy-mm-dd, UTC.
    pub date: String,
    pub heavy_ops: i64,
    pub light_ops: i64,
    pub files_processed: i64,
    pub bytes_processed: i64,
    pub last_updated: OffsetDateTime,
}

impl UsageRecord {
    pub fn empty(user_id: impl Into<String>, date: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            date: date.into(),
            heavy_ops: 0,
            light_ops: 0,
            files_processed: 0,
            bytes_processed: 0,
            last_updated: OffsetDateTime::now_utc(),
        }
    }
}

/// UTC day key for a timestamp, yyyy-mm-dd.
pub fn day_key(now: OffsetDateTime) -> String {
    let format = format_description!("[year]-[month]-[day]");
    now.to_offset(time::UtcOffset::UTC)
        .date()
        .format(&format)
        .unwrap_or_else(|_| now.date().to_string())
}

#[derive(Debug, sqlx::FromRow)]
struct UsageRow {
    user_id: String,
    usage_date: String,
    heavy_ops: i64,
    light_ops: i64,
    files_processed: i64,
    bytes_processed: i64,
    last_updated: OffsetDateTime,
}

impl From<UsageRow> for UsageRecord {
    fn from(row: UsageRow) -> Self {
        UsageRecord {
            user_id: row.user_id,
            date: row.usage_date,
            heavy_ops: row.heavy_ops,
            light_ops: row.light_ops,
            files_processed: row.files_processed,
            bytes_processed: row.bytes_processed,
            last_updated: row.last_updated,
        }
    }
}

/// Durable store for usage counters. Increments are single upsert
/// statements: atomic and monotonic, safe under concurrent tool calls.
#[derive(Clone)]
pub struct UsageStore {
    pool: PgPool,
}

impl UsageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Counters for a specific day. Missing rows read as zeroes.
    pub async fn get(&self, user_id: &str, date: &str) -> BillingResult<UsageRecord> {
        let row: Option<UsageRow> = sqlx::query_as(
            r#"
            SELECT user_id, usage_date, heavy_ops, light_ops,
                   files_processed, bytes_processed, last_updated
            FROM usage_records
            WHERE user_id = $1 AND usage_date = $2
            "#,
        )
        .bind(user_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(UsageRecord::from)
            .unwrap_or_else(|| UsageRecord::empty(user_id, date)))
    }

    /// Today's counters (UTC).
    pub async fn get_today(&self, user_id: &str) -> BillingResult<UsageRecord> {
        self.get(user_id, &day_key(OffsetDateTime::now_utc())).await
    }

    pub async fn record_heavy_op(&self, user_id: &str) -> BillingResult<()> {
        self.increment(user_id, "heavy_ops = usage_records.heavy_ops + 1")
            .await
    }

    pub async fn record_light_op(&self, user_id: &str) -> BillingResult<()> {
        self.increment(user_id, "light_ops = usage_records.light_ops + 1")
            .await
    }

    pub async fn record_files(&self, user_id: &str, count: i64, bytes: i64) -> BillingResult<()> {
        let date = day_key(OffsetDateTime::now_utc());
        sqlx::query(
            r#"
            INSERT INTO usage_records (user_id, usage_date, files_processed, bytes_processed, last_updated)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (user_id, usage_date) DO UPDATE SET
                files_processed = usage_records.files_processed + EXCLUDED.files_processed,
                bytes_processed = usage_records.bytes_processed + EXCLUDED.bytes_processed,
                last_updated = NOW()
            "#,
        )
        .bind(user_id)
        .bind(&date)
        .bind(count.max(0))
        .bind(bytes.max(0))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increment(&self, user_id: &str, set_clause: &str) -> BillingResult<()> {
        let date = day_key(OffsetDateTime::now_utc());
        let sql = format!(
            r#"
            INSERT INTO usage_records (user_id, usage_date, {column}, last_updated)
            VALUES ($1, $2, 1, NOW())
            ON CONFLICT (user_id, usage_date) DO UPDATE SET
                {set_clause},
                last_updated = NOW()
            "#,
            column = set_clause.split(' ').next().unwrap_or("heavy_ops"),
        );
        sqlx::query(&sql).bind(user_id).bind(&date).execute(&self.pool).await?;
        Ok(())
    }
}
