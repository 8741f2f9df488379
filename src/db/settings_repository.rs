//! Settings repository - database operations for engine settings

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;

use super::format_ts;
use crate::models::{EngineSettings, Setting};

pub struct SettingsRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SettingsRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a setting by key
    pub async fn get_setting(&self, key: &str) -> Result<Option<Setting>> {
        sqlx::query_as::<_, Setting>(
            r#"
            SELECT key, value, description, created_at, updated_at
            FROM settings
            WHERE key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(self.pool)
        .await
        .context("Failed to fetch setting")
    }

    pub async fn list(&self) -> Result<Vec<Setting>> {
        sqlx::query_as::<_, Setting>(
            r#"
            SELECT key, value, description, created_at, updated_at
            FROM settings
            ORDER BY key
            "#,
        )
        .fetch_all(self.pool)
        .await
        .context("Failed to read settings table")
    }

    /// Set or update a setting
    pub async fn set_setting(
        &self,
        key: &str,
        value: &str,
        description: Option<&str>,
    ) -> Result<()> {
        let now = format_ts(Utc::now());

        sqlx::query(
            r#"
            INSERT INTO settings (key, value, description, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                description = COALESCE(excluded.description, description),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(description)
        .bind(&now)
        .bind(&now)
        .execute(self.pool)
        .await
        .context("Failed to save setting")?;

        Ok(())
    }

    /// Typed engine settings
    pub async fn engine_settings(&self) -> Result<EngineSettings> {
        let pairs: Vec<(String, String)> = self
            .list()
            .await?
            .into_iter()
            .map(|s| (s.key, s.value))
            .collect();

        Ok(EngineSettings::from_settings(&pairs))
    }
}
