//! Health record repository

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use super::{format_ts, parse_opt_ts, parse_ts};
use crate::models::{HealthRecord, HealthStatus};

/// Row returned from health_records table
#[derive(Debug, sqlx::FromRow)]
struct HealthRow {
    server_id: String,
    checks_enabled: bool,
    interval_minutes: i64,
    notify_cooldown_minutes: i64,
    latency_threshold_ms: i64,
    last_status: String,
    last_latency_ms: Option<i64>,
    total_checks: i64,
    successful_checks: i64,
    failed_checks: i64,
    uptime_percent: f64,
    last_checked_at: Option<String>,
    last_notified_at: Option<String>,
    last_error: Option<String>,
    created_at: String,
    updated_at: String,
}

const HEALTH_COLUMNS: &str = "server_id, checks_enabled, interval_minutes, \
     notify_cooldown_minutes, latency_threshold_ms, last_status, last_latency_ms, total_checks, \
     successful_checks, failed_checks, uptime_percent, last_checked_at, last_notified_at, \
     last_error, created_at, updated_at";

/// Repository for per-server health statistics
pub struct HealthRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> HealthRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, server_id: &str) -> Result<Option<HealthRecord>> {
        let row = sqlx::query_as::<_, HealthRow>(&format!(
            "SELECT {} FROM health_records WHERE server_id = ?",
            HEALTH_COLUMNS
        ))
        .bind(server_id)
        .fetch_optional(self.pool)
        .await
        .context("Failed to fetch health record")?;

        row.map(row_to_record).transpose()
    }

    /// Insert a record, leaving an existing one untouched
    pub async fn create(&self, record: &HealthRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO health_records (
                server_id, checks_enabled, interval_minutes, notify_cooldown_minutes,
                latency_threshold_ms, last_status, uptime_percent, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.server_id)
        .bind(record.checks_enabled)
        .bind(i64::from(record.interval_minutes))
        .bind(i64::from(record.notify_cooldown_minutes))
        .bind(to_i64(record.latency_threshold_ms)?)
        .bind(record.last_status.as_str())
        .bind(record.uptime_percent)
        .bind(format_ts(record.created_at))
        .bind(format_ts(record.updated_at))
        .execute(self.pool)
        .await
        .context("Failed to create health record")?;

        Ok(result.rows_affected() == 1)
    }

    /// Persist the rolling counters and last observation
    pub async fn save(&self, record: &HealthRecord) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE health_records
            SET last_status = ?, last_latency_ms = ?, total_checks = ?, successful_checks = ?,
                failed_checks = ?, uptime_percent = ?, last_checked_at = ?, last_notified_at = ?,
                last_error = ?, updated_at = ?
            WHERE server_id = ?
            "#,
        )
        .bind(record.last_status.as_str())
        .bind(record.last_latency_ms.map(to_i64).transpose()?)
        .bind(to_i64(record.total_checks)?)
        .bind(to_i64(record.successful_checks)?)
        .bind(to_i64(record.failed_checks)?)
        .bind(record.uptime_percent)
        .bind(record.last_checked_at.map(format_ts))
        .bind(record.last_notified_at.map(format_ts))
        .bind(&record.last_error)
        .bind(format_ts(record.updated_at))
        .bind(&record.server_id)
        .execute(self.pool)
        .await
        .context("Failed to save health record")?;

        Ok(())
    }

    /// Toggle checks for one server
    pub async fn set_checks_enabled(&self, server_id: &str, enabled: bool) -> Result<bool> {
        let result =
            sqlx::query("UPDATE health_records SET checks_enabled = ? WHERE server_id = ?")
                .bind(enabled)
                .bind(server_id)
                .execute(self.pool)
                .await
                .context("Failed to update health record")?;

        Ok(result.rows_affected() > 0)
    }
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).with_context(|| format!("Counter {} exceeds storage range", value))
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn to_u32(value: i64) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn row_to_record(row: HealthRow) -> Result<HealthRecord> {
    Ok(HealthRecord {
        server_id: row.server_id,
        checks_enabled: row.checks_enabled,
        interval_minutes: to_u32(row.interval_minutes).max(1),
        notify_cooldown_minutes: to_u32(row.notify_cooldown_minutes),
        latency_threshold_ms: to_u64(row.latency_threshold_ms),
        last_status: HealthStatus::parse(&row.last_status).unwrap_or(HealthStatus::Unknown),
        last_latency_ms: row.last_latency_ms.map(to_u64),
        total_checks: to_u64(row.total_checks),
        successful_checks: to_u64(row.successful_checks),
        failed_checks: to_u64(row.failed_checks),
        uptime_percent: row.uptime_percent,
        last_checked_at: parse_opt_ts(row.last_checked_at.as_deref())?,
        last_notified_at: parse_opt_ts(row.last_notified_at.as_deref())?,
        last_error: row.last_error,
        created_at: parse_ts(&row.created_at)?,
        updated_at: parse_ts(&row.updated_at)?,
    })
}
