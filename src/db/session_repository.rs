//! Connection session repository

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::format_ts;

pub struct SessionRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SessionRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a session for a key, returning its id
    pub async fn open(&self, key_id: &str, started_at: DateTime<Utc>) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO connection_sessions (id, key_id, started_at, is_active) VALUES (?, ?, ?, 1)",
        )
        .bind(&id)
        .bind(key_id)
        .bind(format_ts(started_at))
        .execute(self.pool)
        .await
        .context("Failed to open connection session")?;

        Ok(id)
    }

    /// End every active session of a key
    pub async fn close_active(
        &self,
        key_id: &str,
        now: DateTime<Utc>,
        reason: &str,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE connection_sessions
            SET is_active = 0, ended_at = ?, end_reason = ?
            WHERE key_id = ? AND is_active = 1
            "#,
        )
        .bind(format_ts(now))
        .bind(reason)
        .bind(key_id)
        .execute(self.pool)
        .await
        .context("Failed to close connection sessions")?;

        Ok(result.rows_affected())
    }

    pub async fn count_active(&self, key_id: &str) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM connection_sessions WHERE key_id = ? AND is_active = 1",
        )
        .bind(key_id)
        .fetch_one(self.pool)
        .await
        .context("Failed to count connection sessions")
    }
}
