//! Archive repository - settling keys out of the live table

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{format_ts, from_db_bytes, parse_opt_ts, parse_ts, to_db_bytes};
use crate::models::{retention_until, AccessKey, ArchiveReason, ArchivedKey};

/// Row returned from archived_keys table
#[derive(Debug, sqlx::FromRow)]
struct ArchivedKeyRow {
    id: String,
    original_key_id: String,
    server_id: String,
    remote_key_id: String,
    name: String,
    archive_reason: String,
    expires_at: Option<String>,
    data_limit_bytes: Option<i64>,
    used_bytes: i64,
    contact_handle: Option<String>,
    telegram_chat_id: Option<String>,
    disabled_at: Option<String>,
    key_created_at: String,
    archived_at: String,
    retention_until: String,
}

const ARCHIVE_COLUMNS: &str = "id, original_key_id, server_id, remote_key_id, name, \
     archive_reason, expires_at, data_limit_bytes, used_bytes, contact_handle, \
     telegram_chat_id, disabled_at, key_created_at, archived_at, retention_until";

/// Repository for archived keys
pub struct ArchiveRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ArchiveRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert the archive copy and delete the live row in one transaction.
    ///
    /// The delete only matches a key that is still EXPIRED or DEPLETED; if it
    /// matches nothing the transaction is rolled back and an error returned.
    pub async fn archive(
        &self,
        key: &AccessKey,
        reason: ArchiveReason,
        now: DateTime<Utc>,
    ) -> Result<ArchivedKey> {
        let archived = ArchivedKey {
            id: Uuid::new_v4().to_string(),
            original_key_id: key.id.clone(),
            server_id: key.server_id.clone(),
            remote_key_id: key.remote_key_id.clone(),
            name: key.name.clone(),
            archive_reason: reason,
            expires_at: key.expires_at,
            data_limit_bytes: key.data_limit_bytes,
            used_bytes: key.used_bytes,
            contact_handle: key.contact_handle.clone(),
            telegram_chat_id: key.telegram_chat_id.clone(),
            disabled_at: key.disabled_at,
            key_created_at: key.created_at,
            archived_at: now,
            retention_until: retention_until(now),
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin archive transaction")?;

        sqlx::query(&format!(
            "INSERT INTO archived_keys ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            ARCHIVE_COLUMNS
        ))
        .bind(&archived.id)
        .bind(&archived.original_key_id)
        .bind(&archived.server_id)
        .bind(&archived.remote_key_id)
        .bind(&archived.name)
        .bind(reason.as_str())
        .bind(archived.expires_at.map(format_ts))
        .bind(archived.data_limit_bytes.map(to_db_bytes).transpose()?)
        .bind(to_db_bytes(archived.used_bytes)?)
        .bind(&archived.contact_handle)
        .bind(&archived.telegram_chat_id)
        .bind(archived.disabled_at.map(format_ts))
        .bind(format_ts(archived.key_created_at))
        .bind(format_ts(archived.archived_at))
        .bind(format_ts(archived.retention_until))
        .execute(&mut *tx)
        .await
        .context("Failed to insert archived key")?;

        let deleted = sqlx::query(
            "DELETE FROM access_keys WHERE id = ? AND status IN ('EXPIRED', 'DEPLETED')",
        )
        .bind(&key.id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete live access key")?;

        if deleted.rows_affected() == 0 {
            anyhow::bail!("Access key {} is no longer settling", key.id);
        }

        tx.commit()
            .await
            .context("Failed to commit archive transaction")?;

        Ok(archived)
    }

    pub async fn get_by_original_id(&self, key_id: &str) -> Result<Option<ArchivedKey>> {
        let row = sqlx::query_as::<_, ArchivedKeyRow>(&format!(
            "SELECT {} FROM archived_keys WHERE original_key_id = ?",
            ARCHIVE_COLUMNS
        ))
        .bind(key_id)
        .fetch_optional(self.pool)
        .await
        .context("Failed to fetch archived key")?;

        row.map(row_to_archived).transpose()
    }

    pub async fn list(&self) -> Result<Vec<ArchivedKey>> {
        let rows = sqlx::query_as::<_, ArchivedKeyRow>(&format!(
            "SELECT {} FROM archived_keys ORDER BY archived_at DESC",
            ARCHIVE_COLUMNS
        ))
        .fetch_all(self.pool)
        .await
        .context("Failed to fetch archived keys")?;

        rows.into_iter().map(row_to_archived).collect()
    }
}

fn row_to_archived(row: ArchivedKeyRow) -> Result<ArchivedKey> {
    let archive_reason = ArchiveReason::parse(&row.archive_reason).ok_or_else(|| {
        anyhow::anyhow!("Unknown archive reason in database: {}", row.archive_reason)
    })?;

    Ok(ArchivedKey {
        id: row.id,
        original_key_id: row.original_key_id,
        server_id: row.server_id,
        remote_key_id: row.remote_key_id,
        name: row.name,
        archive_reason,
        expires_at: parse_opt_ts(row.expires_at.as_deref())?,
        data_limit_bytes: row.data_limit_bytes.map(from_db_bytes).transpose()?,
        used_bytes: from_db_bytes(row.used_bytes)?,
        contact_handle: row.contact_handle,
        telegram_chat_id: row.telegram_chat_id,
        disabled_at: parse_opt_ts(row.disabled_at.as_deref())?,
        key_created_at: parse_ts(&row.key_created_at)?,
        archived_at: parse_ts(&row.archived_at)?,
        retention_until: parse_ts(&row.retention_until)?,
    })
}
