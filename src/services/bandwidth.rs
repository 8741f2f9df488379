//! Bandwidth threshold alerts and quota cutoff
//!
//! Each ACTIVE key with a quota is evaluated from the highest threshold down
//! and at most one action fires per key per pass. Threshold flags are set
//! before the notification goes out, so an alert is sent at most once.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use super::notification::{Notification, NotificationDispatcher};
use super::remote_server::RemoteServerConnector;
use crate::db::Store;
use crate::models::{AccessKey, BandwidthSummary, BandwidthThreshold, JobError, KeyStatus};

/// Session close reason recorded by the quota cutoff
pub const QUOTA_CLOSE_REASON: &str = "quota_exceeded";

/// What a single key needs this pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandwidthAction {
    AutoDisable,
    Alert(BandwidthThreshold),
    Nothing,
}

/// Decide the action for a key from its current usage and flags
pub fn evaluate(key: &AccessKey) -> BandwidthAction {
    if key.data_limit_bytes.is_none() {
        return BandwidthAction::Nothing;
    }
    if key.auto_disable_on_limit && key.quota_exhausted() {
        return BandwidthAction::AutoDisable;
    }
    for threshold in [BandwidthThreshold::Critical, BandwidthThreshold::Warning] {
        if key.usage_reached(threshold.percent()) && !key.flag_set(threshold) {
            return BandwidthAction::Alert(threshold);
        }
    }
    BandwidthAction::Nothing
}

enum Evaluated {
    Alerted(BandwidthThreshold),
    Disabled,
    Unchanged,
    Failed(JobError),
}

pub struct BandwidthAlertMonitor {
    store: Arc<dyn Store>,
    connector: Arc<dyn RemoteServerConnector>,
    dispatcher: Arc<NotificationDispatcher>,
    max_concurrent: usize,
}

impl BandwidthAlertMonitor {
    pub fn new(
        store: Arc<dyn Store>,
        connector: Arc<dyn RemoteServerConnector>,
        dispatcher: Arc<NotificationDispatcher>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            store,
            connector,
            dispatcher,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub async fn check(&self) -> Result<BandwidthSummary> {
        self.check_at(Utc::now()).await
    }

    pub async fn check_at(&self, now: DateTime<Utc>) -> Result<BandwidthSummary> {
        let settings = self
            .store
            .load_settings()
            .await
            .context("Failed to load engine settings")?;
        let keys = self
            .store
            .list_keys_by_status(&[KeyStatus::Active])
            .await
            .context("Failed to load active keys")?;

        let metered: Vec<AccessKey> = keys
            .into_iter()
            .filter(|key| key.data_limit_bytes.is_some())
            .collect();

        let mut summary = BandwidthSummary {
            keys_checked: metered.len(),
            ..Default::default()
        };
        let enabled = settings.notifications_enabled;

        let results: Vec<Evaluated> = stream::iter(metered)
            .map(|key| async move { self.apply(key, now, enabled).await })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        for result in results {
            match result {
                Evaluated::Alerted(BandwidthThreshold::Warning) => summary.warnings_sent += 1,
                Evaluated::Alerted(BandwidthThreshold::Critical) => summary.critical_sent += 1,
                Evaluated::Disabled => summary.auto_disabled += 1,
                Evaluated::Unchanged => {}
                Evaluated::Failed(e) => summary.errors.push(e),
            }
        }

        info!(
            checked = summary.keys_checked,
            warnings = summary.warnings_sent,
            critical = summary.critical_sent,
            disabled = summary.auto_disabled,
            errors = summary.errors.len(),
            "Bandwidth check complete"
        );

        Ok(summary)
    }

    async fn apply(&self, key: AccessKey, now: DateTime<Utc>, enabled: bool) -> Evaluated {
        match evaluate(&key) {
            BandwidthAction::Nothing => Evaluated::Unchanged,
            BandwidthAction::Alert(threshold) => self.alert(&key, threshold, now, enabled).await,
            BandwidthAction::AutoDisable => self.disable(&key, now, enabled).await,
        }
    }

    async fn alert(
        &self,
        key: &AccessKey,
        threshold: BandwidthThreshold,
        now: DateTime<Utc>,
        enabled: bool,
    ) -> Evaluated {
        match self.store.set_bandwidth_flag(&key.id, threshold, now).await {
            Ok(true) => {
                info!(
                    key_id = %key.id,
                    threshold = threshold.percent(),
                    used = key.used_bytes,
                    "Bandwidth threshold reached"
                );
                self.dispatcher
                    .notify_key(key, &Notification::bandwidth(key, threshold), enabled)
                    .await;
                Evaluated::Alerted(threshold)
            }
            Ok(false) => {
                debug!(key_id = %key.id, threshold = threshold.percent(), "Alert already recorded");
                Evaluated::Unchanged
            }
            Err(e) => {
                error!(key_id = %key.id, error = %e, "Failed to set bandwidth flag");
                Evaluated::Failed(JobError::key(Some(&key.server_id), &key.id, format!("{:#}", e)))
            }
        }
    }

    /// Quota cutoff: DEPLETED with `disabled_at`, remote credential removed, sessions closed
    async fn disable(&self, key: &AccessKey, now: DateTime<Utc>, enabled: bool) -> Evaluated {
        match self
            .store
            .transition_status(&key.id, &[KeyStatus::Active], KeyStatus::Depleted, now, Some(now))
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(key_id = %key.id, "Key no longer active, skipping cutoff");
                return Evaluated::Unchanged;
            }
            Err(e) => {
                error!(key_id = %key.id, error = %e, "Failed to disable key");
                return Evaluated::Failed(JobError::key(
                    Some(&key.server_id),
                    &key.id,
                    format!("{:#}", e),
                ));
            }
        }

        self.delete_remote(key).await;

        match self
            .store
            .close_active_sessions(&key.id, now, QUOTA_CLOSE_REASON)
            .await
        {
            Ok(closed) if closed > 0 => debug!(key_id = %key.id, closed, "Closed active sessions"),
            Ok(_) => {}
            Err(e) => warn!(key_id = %key.id, error = %e, "Failed to close sessions"),
        }

        info!(key_id = %key.id, server_id = %key.server_id, used = key.used_bytes, "Key disabled at quota");
        self.dispatcher
            .notify_key(key, &Notification::key_disabled(key), enabled)
            .await;

        Evaluated::Disabled
    }

    async fn delete_remote(&self, key: &AccessKey) {
        let server = match self.store.get_server(&key.server_id).await {
            Ok(Some(server)) if server.is_active => server,
            Ok(Some(_)) => {
                debug!(key_id = %key.id, server_id = %key.server_id, "Server inactive, skipping revocation");
                return;
            }
            Ok(None) => {
                warn!(key_id = %key.id, server_id = %key.server_id, "Server missing, cannot revoke credential");
                return;
            }
            Err(e) => {
                warn!(key_id = %key.id, error = %e, "Failed to load server for revocation");
                return;
            }
        };

        let result = match self.connector.connect(&server) {
            Ok(api) => api.delete_access_key(&key.remote_key_id).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(key_id = %key.id, server_id = %server.id, error = %e, "Failed to revoke remote credential");
        }
    }
}
