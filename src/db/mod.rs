//! Database layer
//!
//! Local storage for the reconciliation engine:
//! - Servers and their live access keys
//! - Append-only usage snapshots
//! - Archived (settled) keys
//! - Health records and the notification log
//! - Engine settings

pub mod access_key_repository;
pub mod archive_repository;
pub mod health_repository;
pub mod notification_repository;
pub mod server_repository;
pub mod session_repository;
pub mod settings_repository;
pub mod sqlite_store;
pub mod usage_repository;

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};

use crate::config::DatabaseConfig;
use crate::models::{
    AccessKey, ArchiveReason, ArchivedKey, BandwidthThreshold, EngineSettings, HealthRecord,
    KeyStatus, NewNotificationRecord, NotificationRecord, Server, UsageSnapshot,
};

pub use sqlite_store::SqliteStore;

/// Database connection pool type
pub type DbPool = Pool<Sqlite>;

/// Initialize the database connection pool and run embedded migrations
pub async fn init_pool(config: &DatabaseConfig) -> Result<DbPool> {
    let in_memory = config.url.contains(":memory:");
    let mut options = SqliteConnectOptions::from_str(&config.url)
        .with_context(|| format!("Invalid database URL: {}", config.url))?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(config.busy_timeout_secs));
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let mut pool_options = SqlitePoolOptions::new()
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs));

    // Each in-memory connection is its own database
    pool_options = if in_memory {
        pool_options
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        pool_options
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
    };

    let pool = pool_options
        .connect_with(options)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    Ok(pool)
}

/// Lightweight connectivity check used by readiness probes
pub async fn check_health(pool: &DbPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .context("Database health check failed")?;
    Ok(())
}

// ============================================================================
// Column conversions
// ============================================================================

/// Fixed-width RFC 3339 so that lexical order equals time order
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp in database: {}", raw))
}

pub fn parse_opt_ts(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(parse_ts).transpose()
}

/// Byte counters are u64 in the engine and i64 in SQLite
pub fn to_db_bytes(value: u64) -> Result<i64> {
    i64::try_from(value).with_context(|| format!("Byte counter {} exceeds storage range", value))
}

pub fn from_db_bytes(value: i64) -> Result<u64> {
    u64::try_from(value).with_context(|| format!("Negative byte counter {} in database", value))
}

// ============================================================================
// Store
// ============================================================================

/// Persistence operations the reconciliation jobs depend on.
///
/// Conditional writes return `true` only when this caller changed the row, so
/// a job proceeds with side effects only after winning the update.
#[async_trait]
pub trait Store: Send + Sync {
    /// Typed engine settings; an error here fails the whole job invocation
    async fn load_settings(&self) -> Result<EngineSettings>;

    async fn list_active_servers(&self) -> Result<Vec<Server>>;

    async fn get_server(&self, server_id: &str) -> Result<Option<Server>>;

    /// Keys on active servers in any of the given statuses
    async fn list_keys_by_status(&self, statuses: &[KeyStatus]) -> Result<Vec<AccessKey>>;

    async fn list_server_keys(
        &self,
        server_id: &str,
        statuses: &[KeyStatus],
    ) -> Result<Vec<AccessKey>>;

    /// Move every PENDING/ACTIVE key on an active server whose expiry has passed to EXPIRED
    async fn expire_due_keys(&self, now: DateTime<Utc>) -> Result<Vec<AccessKey>>;

    /// Move every ACTIVE key on an active server whose usage reached its quota to DEPLETED
    async fn deplete_exhausted_keys(&self, now: DateTime<Utc>) -> Result<Vec<AccessKey>>;

    /// Conditional status change from any of `from` to `to`
    async fn transition_status(
        &self,
        key_id: &str,
        from: &[KeyStatus],
        to: KeyStatus,
        now: DateTime<Utc>,
        disabled_at: Option<DateTime<Utc>>,
    ) -> Result<bool>;

    /// Set a one-shot bandwidth flag if it is still unset
    async fn set_bandwidth_flag(
        &self,
        key_id: &str,
        threshold: BandwidthThreshold,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Record an expiration warning unless one was sent on or after `window_start`
    async fn mark_expiration_warning(
        &self,
        key_id: &str,
        now: DateTime<Utc>,
        window_start: DateTime<Utc>,
    ) -> Result<bool>;

    async fn close_active_sessions(
        &self,
        key_id: &str,
        now: DateTime<Utc>,
        reason: &str,
    ) -> Result<u64>;

    async fn latest_snapshot(&self, key_id: &str) -> Result<Option<UsageSnapshot>>;

    /// Append a snapshot for `current_bytes` and mirror it on the key, atomically
    async fn record_usage(
        &self,
        key_id: &str,
        current_bytes: u64,
        now: DateTime<Utc>,
    ) -> Result<UsageSnapshot>;

    /// Copy a settled key into the archive and delete the live row, atomically
    async fn archive_key(
        &self,
        key: &AccessKey,
        reason: ArchiveReason,
        now: DateTime<Utc>,
    ) -> Result<ArchivedKey>;

    async fn get_health_record(&self, server_id: &str) -> Result<Option<HealthRecord>>;

    /// Insert a record unless one exists
    async fn create_health_record(&self, record: &HealthRecord) -> Result<bool>;

    async fn save_health_record(&self, record: &HealthRecord) -> Result<()>;

    async fn log_notification(&self, record: &NewNotificationRecord)
        -> Result<NotificationRecord>;
}
