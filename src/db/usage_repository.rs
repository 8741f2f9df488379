//! Usage snapshot repository

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::{format_ts, from_db_bytes, parse_ts, to_db_bytes};
use crate::models::{usage_delta, UsageSnapshot};

/// Row returned from usage_snapshots table
#[derive(Debug, sqlx::FromRow)]
struct SnapshotRow {
    id: i64,
    key_id: String,
    value: i64,
    delta: i64,
    captured_at: String,
}

/// Repository for the append-only usage log
pub struct UsageRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UsageRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn latest(&self, key_id: &str) -> Result<Option<UsageSnapshot>> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT id, key_id, value, delta, captured_at
            FROM usage_snapshots
            WHERE key_id = ?
            ORDER BY captured_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(key_id)
        .fetch_optional(self.pool)
        .await
        .context("Failed to fetch latest usage snapshot")?;

        row.map(row_to_snapshot).transpose()
    }

    /// Snapshots of a key in capture order
    pub async fn list_for_key(&self, key_id: &str) -> Result<Vec<UsageSnapshot>> {
        let rows = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT id, key_id, value, delta, captured_at
            FROM usage_snapshots
            WHERE key_id = ?
            ORDER BY captured_at, id
            "#,
        )
        .bind(key_id)
        .fetch_all(self.pool)
        .await
        .context("Failed to fetch usage snapshots")?;

        rows.into_iter().map(row_to_snapshot).collect()
    }

    /// Append a snapshot and mirror the absolute counter on the key in one transaction.
    ///
    /// The key row is updated before the latest snapshot is read, so the delta
    /// is computed under the write lock. Fails without writing when the key row no longer exists.
    pub async fn record(
        &self,
        key_id: &str,
        current_bytes: u64,
        now: DateTime<Utc>,
    ) -> Result<UsageSnapshot> {
        let captured_at = format_ts(now);
        let current = to_db_bytes(current_bytes)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin usage transaction")?;

        // Write first so the transaction holds the write lock before it reads
        let updated = sqlx::query("UPDATE access_keys SET used_bytes = ?, updated_at = ? WHERE id = ?")
            .bind(current)
            .bind(&captured_at)
            .bind(key_id)
            .execute(&mut *tx)
            .await
            .context("Failed to update key usage")?;

        if updated.rows_affected() == 0 {
            anyhow::bail!("Access key {} no longer exists", key_id);
        }

        let previous: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT value FROM usage_snapshots
            WHERE key_id = ?
            ORDER BY captured_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(key_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to read previous usage snapshot")?;

        let previous = previous.map(from_db_bytes).transpose()?;
        let delta = usage_delta(previous, current_bytes);

        let id = sqlx::query(
            r#"
            INSERT INTO usage_snapshots (key_id, value, delta, captured_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(key_id)
        .bind(current)
        .bind(to_db_bytes(delta)?)
        .bind(&captured_at)
        .execute(&mut *tx)
        .await
        .context("Failed to insert usage snapshot")?
        .last_insert_rowid();

        tx.commit()
            .await
            .context("Failed to commit usage transaction")?;

        Ok(UsageSnapshot {
            id,
            key_id: key_id.to_string(),
            value: current_bytes,
            delta,
            captured_at: now,
        })
    }
}

fn row_to_snapshot(row: SnapshotRow) -> Result<UsageSnapshot> {
    Ok(UsageSnapshot {
        id: row.id,
        key_id: row.key_id,
        value: from_db_bytes(row.value)?,
        delta: from_db_bytes(row.delta)?,
        captured_at: parse_ts(&row.captured_at)?,
    })
}
