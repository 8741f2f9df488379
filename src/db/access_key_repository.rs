//! Access key repository - database operations for live keys
//!
//! Every state-changing statement is conditional on the row's current status or
//! flag, so the affected-row count tells the caller whether it won the update.
//! Bulk selections and transitions only cover keys on active servers.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{format_ts, from_db_bytes, parse_opt_ts, parse_ts, to_db_bytes};
use crate::models::{AccessKey, BandwidthThreshold, KeyStatus, NewAccessKey};

/// Row returned from access_keys table
#[derive(Debug, sqlx::FromRow)]
struct AccessKeyRow {
    id: String,
    server_id: String,
    remote_key_id: String,
    name: String,
    status: String,
    expires_at: Option<String>,
    data_limit_bytes: Option<i64>,
    used_bytes: i64,
    alert_80_sent: bool,
    alert_90_sent: bool,
    auto_disable_on_limit: bool,
    contact_handle: Option<String>,
    telegram_chat_id: Option<String>,
    last_warning_at: Option<String>,
    disabled_at: Option<String>,
    created_at: String,
    updated_at: String,
}

const KEY_COLUMNS: &str = "id, server_id, remote_key_id, name, status, expires_at, \
     data_limit_bytes, used_bytes, alert_80_sent, alert_90_sent, auto_disable_on_limit, \
     contact_handle, telegram_chat_id, last_warning_at, disabled_at, created_at, updated_at";

const ON_ACTIVE_SERVER: &str = "server_id IN (SELECT id FROM servers WHERE is_active = 1)";

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// Repository for access key operations
pub struct AccessKeyRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> AccessKeyRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<AccessKey>> {
        let row = sqlx::query_as::<_, AccessKeyRow>(&format!(
            "SELECT {} FROM access_keys WHERE id = ?",
            KEY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await
        .context("Failed to fetch access key")?;

        row.map(row_to_key).transpose()
    }

    /// Keys on active servers in any of the given statuses
    pub async fn list_by_status(&self, statuses: &[KeyStatus]) -> Result<Vec<AccessKey>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {} FROM access_keys WHERE status IN ({}) AND {} ORDER BY created_at, id",
            KEY_COLUMNS,
            placeholders(statuses.len()),
            ON_ACTIVE_SERVER
        );
        let mut query = sqlx::query_as::<_, AccessKeyRow>(&sql);
        for status in statuses {
            query = query.bind(status.as_str());
        }

        let rows = query
            .fetch_all(self.pool)
            .await
            .context("Failed to fetch access keys by status")?;

        rows.into_iter().map(row_to_key).collect()
    }

    /// Keys of one server in any of the given statuses
    pub async fn list_for_server(
        &self,
        server_id: &str,
        statuses: &[KeyStatus],
    ) -> Result<Vec<AccessKey>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {} FROM access_keys WHERE server_id = ? AND status IN ({}) ORDER BY created_at, id",
            KEY_COLUMNS,
            placeholders(statuses.len())
        );
        let mut query = sqlx::query_as::<_, AccessKeyRow>(&sql).bind(server_id);
        for status in statuses {
            query = query.bind(status.as_str());
        }

        let rows = query
            .fetch_all(self.pool)
            .await
            .context("Failed to fetch server access keys")?;

        rows.into_iter().map(row_to_key).collect()
    }

    /// Provision a key row
    pub async fn create(&self, req: &NewAccessKey) -> Result<AccessKey> {
        let id = Uuid::new_v4().to_string();
        let now = format_ts(Utc::now());
        let status = req.status.unwrap_or(KeyStatus::Active);
        let limit = req.data_limit_bytes.map(to_db_bytes).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO access_keys (
                id, server_id, remote_key_id, name, status, expires_at, data_limit_bytes,
                used_bytes, alert_80_sent, alert_90_sent, auto_disable_on_limit,
                contact_handle, telegram_chat_id, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&req.server_id)
        .bind(&req.remote_key_id)
        .bind(&req.name)
        .bind(status.as_str())
        .bind(req.expires_at.map(format_ts))
        .bind(limit)
        .bind(to_db_bytes(req.used_bytes)?)
        .bind(req.alert_80_sent)
        .bind(req.alert_90_sent)
        .bind(req.auto_disable_on_limit)
        .bind(&req.contact_handle)
        .bind(&req.telegram_chat_id)
        .bind(&now)
        .bind(&now)
        .execute(self.pool)
        .await
        .context("Failed to create access key")?;

        self.get_by_id(&id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created access key"))
    }

    /// Bulk expiry of live keys, returning the transitioned rows
    pub async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<AccessKey>> {
        let now = format_ts(now);
        let rows = sqlx::query_as::<_, AccessKeyRow>(&format!(
            r#"
            UPDATE access_keys
            SET status = 'EXPIRED', updated_at = ?
            WHERE status IN ('PENDING', 'ACTIVE')
              AND expires_at IS NOT NULL
              AND expires_at <= ?
              AND {}
            RETURNING {}
            "#,
            ON_ACTIVE_SERVER,
            KEY_COLUMNS
        ))
        .bind(&now)
        .bind(&now)
        .fetch_all(self.pool)
        .await
        .context("Failed to expire due access keys")?;

        rows.into_iter().map(row_to_key).collect()
    }

    /// Bulk depletion of active keys at or over quota, returning the transitioned rows
    pub async fn deplete_exhausted(&self, now: DateTime<Utc>) -> Result<Vec<AccessKey>> {
        let rows = sqlx::query_as::<_, AccessKeyRow>(&format!(
            r#"
            UPDATE access_keys
            SET status = 'DEPLETED', updated_at = ?
            WHERE status = 'ACTIVE'
              AND data_limit_bytes IS NOT NULL
              AND used_bytes >= data_limit_bytes
              AND {}
            RETURNING {}
            "#,
            ON_ACTIVE_SERVER,
            KEY_COLUMNS
        ))
        .bind(format_ts(now))
        .fetch_all(self.pool)
        .await
        .context("Failed to deplete exhausted access keys")?;

        rows.into_iter().map(row_to_key).collect()
    }

    /// Conditional status change; `disabled_at` is kept when `None`
    pub async fn transition_status(
        &self,
        id: &str,
        from: &[KeyStatus],
        to: KeyStatus,
        now: DateTime<Utc>,
        disabled_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        if from.is_empty() {
            return Ok(false);
        }

        let sql = format!(
            r#"
            UPDATE access_keys
            SET status = ?, updated_at = ?, disabled_at = COALESCE(?, disabled_at)
            WHERE id = ? AND status IN ({})
            "#,
            placeholders(from.len())
        );
        let mut query = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(format_ts(now))
            .bind(disabled_at.map(format_ts))
            .bind(id);
        for status in from {
            query = query.bind(status.as_str());
        }

        let result = query
            .execute(self.pool)
            .await
            .context("Failed to transition access key status")?;

        Ok(result.rows_affected() == 1)
    }

    /// Set a one-shot bandwidth flag.
    ///
    /// The critical flag implies the warning flag so a later pass cannot send a
    /// warning for a key that already received the critical alert.
    pub async fn set_bandwidth_flag(
        &self,
        id: &str,
        threshold: BandwidthThreshold,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let sql = match threshold {
            BandwidthThreshold::Warning => {
                r#"
                UPDATE access_keys SET alert_80_sent = 1, updated_at = ?
                WHERE id = ? AND status = 'ACTIVE' AND alert_80_sent = 0
                "#
            }
            BandwidthThreshold::Critical => {
                r#"
                UPDATE access_keys SET alert_90_sent = 1, alert_80_sent = 1, updated_at = ?
                WHERE id = ? AND status = 'ACTIVE' AND alert_90_sent = 0
                "#
            }
        };

        let result = sqlx::query(sql)
            .bind(format_ts(now))
            .bind(id)
            .execute(self.pool)
            .await
            .context("Failed to set bandwidth flag")?;

        Ok(result.rows_affected() == 1)
    }

    /// Administrative reset after a quota change
    pub async fn clear_bandwidth_flags(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE access_keys SET alert_80_sent = 0, alert_90_sent = 0, updated_at = ? WHERE id = ?",
        )
        .bind(format_ts(Utc::now()))
        .bind(id)
        .execute(self.pool)
        .await
        .context("Failed to clear bandwidth flags")?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_expiration_warning(
        &self,
        id: &str,
        now: DateTime<Utc>,
        window_start: DateTime<Utc>,
    ) -> Result<bool> {
        let now = format_ts(now);
        let result = sqlx::query(
            r#"
            UPDATE access_keys
            SET last_warning_at = ?, updated_at = ?
            WHERE id = ?
              AND status IN ('PENDING', 'ACTIVE')
              AND (last_warning_at IS NULL OR last_warning_at < ?)
            "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(id)
        .bind(format_ts(window_start))
        .execute(self.pool)
        .await
        .context("Failed to record expiration warning")?;

        Ok(result.rows_affected() == 1)
    }
}

fn row_to_key(row: AccessKeyRow) -> Result<AccessKey> {
    let status = KeyStatus::parse(&row.status)
        .ok_or_else(|| anyhow::anyhow!("Unknown key status in database: {}", row.status))?;

    Ok(AccessKey {
        id: row.id,
        server_id: row.server_id,
        remote_key_id: row.remote_key_id,
        name: row.name,
        status,
        expires_at: parse_opt_ts(row.expires_at.as_deref())?,
        data_limit_bytes: row.data_limit_bytes.map(from_db_bytes).transpose()?,
        used_bytes: from_db_bytes(row.used_bytes)?,
        alert_80_sent: row.alert_80_sent,
        alert_90_sent: row.alert_90_sent,
        auto_disable_on_limit: row.auto_disable_on_limit,
        contact_handle: row.contact_handle,
        telegram_chat_id: row.telegram_chat_id.filter(|s| !s.is_empty()),
        last_warning_at: parse_opt_ts(row.last_warning_at.as_deref())?,
        disabled_at: parse_opt_ts(row.disabled_at.as_deref())?,
        created_at: parse_ts(&row.created_at)?,
        updated_at: parse_ts(&row.updated_at)?,
    })
}
