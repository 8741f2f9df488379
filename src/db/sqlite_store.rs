//! SQLite-backed [`Store`] composed from the table repositories

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::access_key_repository::AccessKeyRepository;
use super::archive_repository::ArchiveRepository;
use super::health_repository::HealthRepository;
use super::notification_repository::NotificationLogRepository;
use super::server_repository::ServerRepository;
use super::session_repository::SessionRepository;
use super::settings_repository::SettingsRepository;
use super::usage_repository::UsageRepository;
use super::{DbPool, Store};
use crate::models::{
    AccessKey, ArchiveReason, ArchivedKey, BandwidthThreshold, EngineSettings, HealthRecord,
    KeyStatus, NewNotificationRecord, NotificationRecord, Server, UsageSnapshot,
};

#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn servers(&self) -> ServerRepository<'_> {
        ServerRepository::new(&self.pool)
    }

    pub fn keys(&self) -> AccessKeyRepository<'_> {
        AccessKeyRepository::new(&self.pool)
    }

    pub fn usage(&self) -> UsageRepository<'_> {
        UsageRepository::new(&self.pool)
    }

    pub fn archive(&self) -> ArchiveRepository<'_> {
        ArchiveRepository::new(&self.pool)
    }

    pub fn health(&self) -> HealthRepository<'_> {
        HealthRepository::new(&self.pool)
    }

    pub fn notifications(&self) -> NotificationLogRepository<'_> {
        NotificationLogRepository::new(&self.pool)
    }

    pub fn sessions(&self) -> SessionRepository<'_> {
        SessionRepository::new(&self.pool)
    }

    pub fn settings(&self) -> SettingsRepository<'_> {
        SettingsRepository::new(&self.pool)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn load_settings(&self) -> Result<EngineSettings> {
        self.settings().engine_settings().await
    }

    async fn list_active_servers(&self) -> Result<Vec<Server>> {
        self.servers().list_active().await
    }

    async fn get_server(&self, server_id: &str) -> Result<Option<Server>> {
        self.servers().get_by_id(server_id).await
    }

    async fn list_keys_by_status(&self, statuses: &[KeyStatus]) -> Result<Vec<AccessKey>> {
        self.keys().list_by_status(statuses).await
    }

    async fn list_server_keys(
        &self,
        server_id: &str,
        statuses: &[KeyStatus],
    ) -> Result<Vec<AccessKey>> {
        self.keys().list_for_server(server_id, statuses).await
    }

    async fn expire_due_keys(&self, now: DateTime<Utc>) -> Result<Vec<AccessKey>> {
        self.keys().expire_due(now).await
    }

    async fn deplete_exhausted_keys(&self, now: DateTime<Utc>) -> Result<Vec<AccessKey>> {
        self.keys().deplete_exhausted(now).await
    }

    async fn transition_status(
        &self,
        key_id: &str,
        from: &[KeyStatus],
        to: KeyStatus,
        now: DateTime<Utc>,
        disabled_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        self.keys()
            .transition_status(key_id, from, to, now, disabled_at)
            .await
    }

    async fn set_bandwidth_flag(
        &self,
        key_id: &str,
        threshold: BandwidthThreshold,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.keys().set_bandwidth_flag(key_id, threshold, now).await
    }

    async fn mark_expiration_warning(
        &self,
        key_id: &str,
        now: DateTime<Utc>,
        window_start: DateTime<Utc>,
    ) -> Result<bool> {
        self.keys()
            .mark_expiration_warning(key_id, now, window_start)
            .await
    }

    async fn close_active_sessions(
        &self,
        key_id: &str,
        now: DateTime<Utc>,
        reason: &str,
    ) -> Result<u64> {
        self.sessions().close_active(key_id, now, reason).await
    }

    async fn latest_snapshot(&self, key_id: &str) -> Result<Option<UsageSnapshot>> {
        self.usage().latest(key_id).await
    }

    async fn record_usage(
        &self,
        key_id: &str,
        current_bytes: u64,
        now: DateTime<Utc>,
    ) -> Result<UsageSnapshot> {
        self.usage().record(key_id, current_bytes, now).await
    }

    async fn archive_key(
        &self,
        key: &AccessKey,
        reason: ArchiveReason,
        now: DateTime<Utc>,
    ) -> Result<ArchivedKey> {
        self.archive().archive(key, reason, now).await
    }

    async fn get_health_record(&self, server_id: &str) -> Result<Option<HealthRecord>> {
        self.health().get(server_id).await
    }

    async fn create_health_record(&self, record: &HealthRecord) -> Result<bool> {
        self.health().create(record).await
    }

    async fn save_health_record(&self, record: &HealthRecord) -> Result<()> {
        self.health().save(record).await
    }

    async fn log_notification(
        &self,
        record: &NewNotificationRecord,
    ) -> Result<NotificationRecord> {
        self.notifications().create(record).await
    }
}
