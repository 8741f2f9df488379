//! Server repository - database operations for remote servers

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{format_ts, parse_ts};
use crate::models::{NewServer, Server};

/// Row returned from servers table
#[derive(Debug, sqlx::FromRow)]
struct ServerRow {
    id: String,
    name: String,
    api_url: String,
    cert_sha256: Option<String>,
    is_active: bool,
    location: Option<String>,
    country_code: Option<String>,
    created_at: String,
    updated_at: String,
}

const SERVER_COLUMNS: &str =
    "id, name, api_url, cert_sha256, is_active, location, country_code, created_at, updated_at";

/// Repository for server operations
pub struct ServerRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ServerRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Servers included in reconciliation
    pub async fn list_active(&self) -> Result<Vec<Server>> {
        let rows = sqlx::query_as::<_, ServerRow>(&format!(
            "SELECT {} FROM servers WHERE is_active = 1 ORDER BY name",
            SERVER_COLUMNS
        ))
        .fetch_all(self.pool)
        .await
        .context("Failed to fetch active servers")?;

        rows.into_iter().map(row_to_server).collect()
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<Server>> {
        let row = sqlx::query_as::<_, ServerRow>(&format!(
            "SELECT {} FROM servers WHERE id = ?",
            SERVER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await
        .context("Failed to fetch server")?;

        row.map(row_to_server).transpose()
    }

    /// Register a new server
    pub async fn create(&self, req: &NewServer) -> Result<Server> {
        let id = Uuid::new_v4().to_string();
        let now = format_ts(Utc::now());

        sqlx::query(
            r#"
            INSERT INTO servers (id, name, api_url, cert_sha256, is_active, location, country_code, created_at, updated_at)
            VALUES (?, ?, ?, ?, 1, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&req.name)
        .bind(&req.api_url)
        .bind(&req.cert_sha256)
        .bind(&req.location)
        .bind(&req.country_code)
        .bind(&now)
        .bind(&now)
        .execute(self.pool)
        .await
        .context("Failed to create server")?;

        self.get_by_id(&id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created server"))
    }

    /// Include or exclude a server from reconciliation
    pub async fn set_active(&self, id: &str, is_active: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE servers SET is_active = ?, updated_at = ? WHERE id = ?")
            .bind(is_active)
            .bind(format_ts(Utc::now()))
            .bind(id)
            .execute(self.pool)
            .await
            .context("Failed to update server")?;

        Ok(result.rows_affected() > 0)
    }
}

fn row_to_server(row: ServerRow) -> Result<Server> {
    Ok(Server {
        id: row.id,
        name: row.name,
        api_url: row.api_url,
        cert_sha256: row.cert_sha256.filter(|s| !s.is_empty()),
        is_active: row.is_active,
        location: row.location,
        country_code: row.country_code,
        created_at: parse_ts(&row.created_at)?,
        updated_at: parse_ts(&row.updated_at)?,
    })
}
