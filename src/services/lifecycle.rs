//! Key lifecycle reconciliation
//!
//! One pass runs, in order:
//! 1. expiration warnings for live keys inside the warning window
//! 2. bulk expiry of live keys past `expires_at`
//! 3. bulk depletion of active keys at or over quota
//! 4. archival of keys that were already EXPIRED/DEPLETED when the pass started
//!
//! Keys transitioned in steps 2 and 3 are archived by the following pass.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use super::notification::{Notification, NotificationDispatcher};
use super::remote_server::{DeleteOutcome, RemoteServerConnector};
use crate::db::Store;
use crate::models::{
    AccessKey, ArchiveReason, EngineSettings, JobError, KeyStatus, LifecycleSummary,
};

pub struct LifecycleReconciler {
    store: Arc<dyn Store>,
    connector: Arc<dyn RemoteServerConnector>,
    dispatcher: Arc<NotificationDispatcher>,
    max_concurrent: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RemoteDelete {
    Done,
    /// Server inactive; nothing was attempted
    Skipped,
    Failed,
}

enum Settled {
    Archived(RemoteDelete),
    Failed(RemoteDelete, JobError),
}

impl LifecycleReconciler {
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

    pub async fn reconcile(&self) -> Result<LifecycleSummary> {
        self.reconcile_at(Utc::now()).await
    }

    pub async fn reconcile_at(&self, now: DateTime<Utc>) -> Result<LifecycleSummary> {
        let settings = self
            .store
            .load_settings()
            .await
            .context("Failed to load engine settings")?;

        // Captured before any transition so this pass only settles older keys
        let settling = self
            .store
            .list_keys_by_status(&KeyStatus::SETTLING)
            .await
            .context("Failed to load settling keys")?;

        let mut summary = LifecycleSummary::default();

        self.send_expiration_warnings(&settings, now, &mut summary)
            .await;

        match self.store.expire_due_keys(now).await {
            Ok(expired) => {
                summary.expired = expired.len();
                for key in &expired {
                    info!(key_id = %key.id, server_id = %key.server_id, "Access key expired");
                    self.dispatcher
                        .notify_key(key, &Notification::key_expired(key), settings.notifications_enabled)
                        .await;
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to expire due keys");
                summary
                    .errors
                    .push(JobError::key(None, "*", format!("expire: {:#}", e)));
            }
        }

        match self.store.deplete_exhausted_keys(now).await {
            Ok(depleted) => {
                summary.depleted = depleted.len();
                for key in &depleted {
                    info!(key_id = %key.id, server_id = %key.server_id, "Access key depleted");
                    self.dispatcher
                        .notify_key(key, &Notification::key_depleted(key), settings.notifications_enabled)
                        .await;
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to deplete exhausted keys");
                summary
                    .errors
                    .push(JobError::key(None, "*", format!("deplete: {:#}", e)));
            }
        }

        let results: Vec<Settled> = stream::iter(settling)
            .map(|key| async move { self.settle(key, now).await })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        for result in results {
            let remote = match result {
                Settled::Archived(remote) => {
                    summary.archived += 1;
                    remote
                }
                Settled::Failed(remote, error) => {
                    summary.errors.push(error);
                    remote
                }
            };
            if remote == RemoteDelete::Failed {
                summary.remote_deletions_failed += 1;
            }
        }

        info!(
            warnings = summary.warnings_sent,
            expired = summary.expired,
            depleted = summary.depleted,
            archived = summary.archived,
            remote_failures = summary.remote_deletions_failed,
            errors = summary.errors.len(),
            "Lifecycle reconciliation complete"
        );

        Ok(summary)
    }

    async fn send_expiration_warnings(
        &self,
        settings: &EngineSettings,
        now: DateTime<Utc>,
        summary: &mut LifecycleSummary,
    ) {
        if settings.warning_period_days == 0 {
            return;
        }
        let period = Duration::days(i64::from(settings.warning_period_days));

        let keys = match self.store.list_keys_by_status(&KeyStatus::LIVE).await {
            Ok(keys) => keys,
            Err(e) => {
                error!(error = %e, "Failed to load live keys for expiration warnings");
                summary
                    .errors
                    .push(JobError::key(None, "*", format!("warnings: {:#}", e)));
                return;
            }
        };

        for key in keys {
            let Some(expires_at) = key.expires_at else {
                continue;
            };
            let window_start = expires_at - period;
            if now < window_start || now >= expires_at {
                continue;
            }

            match self
                .store
                .mark_expiration_warning(&key.id, now, window_start)
                .await
            {
                Ok(true) => {
                    debug!(key_id = %key.id, %expires_at, "Sending expiration warning");
                    self.dispatcher
                        .notify_key(
                            &key,
                            &Notification::expiration_warning(&key, expires_at, now),
                            settings.notifications_enabled,
                        )
                        .await;
                    summary.warnings_sent += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(key_id = %key.id, error = %e, "Failed to record expiration warning");
                    summary.errors.push(JobError::key(
                        Some(&key.server_id),
                        &key.id,
                        format!("{:#}", e),
                    ));
                }
            }
        }
    }

    /// Best-effort remote delete, then archive.
    async fn settle(&self, key: AccessKey, now: DateTime<Utc>) -> Settled {
        let remote = self.delete_remote(&key).await;

        let Some(reason) = ArchiveReason::for_status(key.status) else {
            return Settled::Failed(
                remote,
                JobError::key(
                    Some(&key.server_id),
                    &key.id,
                    format!("status {} cannot be archived", key.status),
                ),
            );
        };

        match self.store.archive_key(&key, reason, now).await {
            Ok(archived) => {
                info!(
                    key_id = %key.id,
                    archive_id = %archived.id,
                    reason = %reason,
                    remote = ?remote,
                    "Archived access key"
                );
                Settled::Archived(remote)
            }
            Err(e) => {
                error!(key_id = %key.id, error = %e, "Failed to archive access key");
                Settled::Failed(
                    remote,
                    JobError::key(Some(&key.server_id), &key.id, format!("{:#}", e)),
                )
            }
        }
    }

    async fn delete_remote(&self, key: &AccessKey) -> RemoteDelete {
        let server = match self.store.get_server(&key.server_id).await {
            Ok(Some(server)) if server.is_active => server,
            Ok(Some(_)) => {
                debug!(key_id = %key.id, server_id = %key.server_id, "Server inactive, skipping remote delete");
                return RemoteDelete::Skipped;
            }
            Ok(None) => {
                warn!(key_id = %key.id, server_id = %key.server_id, "Server missing, skipping remote delete");
                return RemoteDelete::Failed;
            }
            Err(e) => {
                warn!(key_id = %key.id, error = %e, "Failed to load server for remote delete");
                return RemoteDelete::Failed;
            }
        };

        let result = match self.connector.connect(&server) {
            Ok(api) => api.delete_access_key(&key.remote_key_id).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(DeleteOutcome::Deleted) => RemoteDelete::Done,
            Ok(DeleteOutcome::AlreadyAbsent) => {
                debug!(key_id = %key.id, "Remote credential already absent");
                RemoteDelete::Done
            }
            Err(e) => {
                warn!(
                    key_id = %key.id,
                    server_id = %server.id,
                    error = %e,
                    "Remote delete failed, archiving anyway"
                );
                RemoteDelete::Failed
            }
        }
    }
}
