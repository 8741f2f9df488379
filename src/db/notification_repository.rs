//! Notification log repository

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{format_ts, parse_ts};
use crate::models::{DeliveryOutcome, NewNotificationRecord, NotificationKind, NotificationRecord};

/// Row returned from notification_log table
#[derive(Debug, sqlx::FromRow)]
struct NotificationRow {
    id: String,
    kind: String,
    message: String,
    outcome: String,
    key_id: Option<String>,
    server_id: Option<String>,
    delivered_channels: i64,
    failed_channels: i64,
    created_at: String,
}

/// Repository for notification audit entries
pub struct NotificationLogRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> NotificationLogRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, req: &NewNotificationRecord) -> Result<NotificationRecord> {
        let record = NotificationRecord {
            id: Uuid::new_v4().to_string(),
            kind: req.kind,
            message: req.message.clone(),
            outcome: req.outcome,
            key_id: req.key_id.clone(),
            server_id: req.server_id.clone(),
            delivered_channels: req.delivered_channels,
            failed_channels: req.failed_channels,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO notification_log (
                id, kind, message, outcome, key_id, server_id,
                delivered_channels, failed_channels, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(record.kind.as_str())
        .bind(&record.message)
        .bind(record.outcome.as_str())
        .bind(&record.key_id)
        .bind(&record.server_id)
        .bind(i64::from(record.delivered_channels))
        .bind(i64::from(record.failed_channels))
        .bind(format_ts(record.created_at))
        .execute(self.pool)
        .await
        .context("Failed to log notification")?;

        Ok(record)
    }

    /// Most recent entries first
    pub async fn list(&self, limit: u32) -> Result<Vec<NotificationRecord>> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT id, kind, message, outcome, key_id, server_id,
                   delivered_channels, failed_channels, created_at
            FROM notification_log
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(self.pool)
        .await
        .context("Failed to fetch notification log")?;

        rows.into_iter().map(row_to_record).collect()
    }

    pub async fn list_for_key(&self, key_id: &str) -> Result<Vec<NotificationRecord>> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT id, kind, message, outcome, key_id, server_id,
                   delivered_channels, failed_channels, created_at
            FROM notification_log
            WHERE key_id = ?
            ORDER BY created_at, rowid
            "#,
        )
        .bind(key_id)
        .fetch_all(self.pool)
        .await
        .context("Failed to fetch key notifications")?;

        rows.into_iter().map(row_to_record).collect()
    }
}

fn row_to_record(row: NotificationRow) -> Result<NotificationRecord> {
    let kind = NotificationKind::parse(&row.kind)
        .ok_or_else(|| anyhow::anyhow!("Unknown notification kind in database: {}", row.kind))?;
    let outcome = DeliveryOutcome::parse(&row.outcome).ok_or_else(|| {
        anyhow::anyhow!("Unknown delivery outcome in database: {}", row.outcome)
    })?;

    Ok(NotificationRecord {
        id: row.id,
        kind,
        message: row.message,
        outcome,
        key_id: row.key_id,
        server_id: row.server_id,
        delivered_channels: u32::try_from(row.delivered_channels).unwrap_or(0),
        failed_channels: u32::try_from(row.failed_channels).unwrap_or(0),
        created_at: parse_ts(&row.created_at)?,
    })
}
