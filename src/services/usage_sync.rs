//! Usage counter synchronisation
//!
//! Mirrors each server's absolute per-credential transfer counters into the
//! local store. Every reading appends a snapshot whose delta follows
//! [`crate::models::usage_delta`]; the key's `used_bytes` is set to the absolute
//! reading rather than accumulated, so a duplicate pass cannot double count.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use super::remote_server::RemoteServerConnector;
use crate::db::Store;
use crate::models::{JobError, KeyStatus, Server, SyncSummary};

pub struct UsageSyncer {
    store: Arc<dyn Store>,
    connector: Arc<dyn RemoteServerConnector>,
    max_concurrent_servers: usize,
}

#[derive(Default)]
struct ServerSync {
    fetched: bool,
    keys_updated: usize,
    errors: Vec<JobError>,
}

impl UsageSyncer {
    pub fn new(
        store: Arc<dyn Store>,
        connector: Arc<dyn RemoteServerConnector>,
        max_concurrent_servers: usize,
    ) -> Self {
        Self {
            store,
            connector,
            max_concurrent_servers: max_concurrent_servers.max(1),
        }
    }

    pub async fn sync(&self) -> Result<SyncSummary> {
        self.sync_at(Utc::now()).await
    }

    /// One pass over all active servers; only store setup failures are returned as errors
    pub async fn sync_at(&self, now: DateTime<Utc>) -> Result<SyncSummary> {
        let servers = self
            .store
            .list_active_servers()
            .await
            .context("Failed to load active servers")?;

        let mut summary = SyncSummary {
            servers_total: servers.len(),
            ..Default::default()
        };

        let results: Vec<ServerSync> = stream::iter(servers)
            .map(|server| async move { self.sync_server(&server, now).await })
            .buffer_unordered(self.max_concurrent_servers)
            .collect()
            .await;

        for result in results {
            if result.fetched {
                summary.servers_synced += 1;
            }
            summary.keys_updated += result.keys_updated;
            summary.per_server_errors.extend(result.errors);
        }

        info!(
            servers = summary.servers_total,
            synced = summary.servers_synced,
            keys_updated = summary.keys_updated,
            errors = summary.per_server_errors.len(),
            "Usage sync complete"
        );

        Ok(summary)
    }

    async fn sync_server(&self, server: &Server, now: DateTime<Utc>) -> ServerSync {
        let mut outcome = ServerSync::default();

        let metrics = match self.connector.connect(server) {
            Ok(api) => api.transfer_metrics().await,
            Err(e) => Err(e),
        };
        let metrics = match metrics {
            Ok(metrics) => metrics,
            Err(e) => {
                warn!(server_id = %server.id, server = %server.name, error = %e, "Failed to fetch transfer metrics");
                outcome.errors.push(JobError::server(&server.id, e.to_string()));
                return outcome;
            }
        };
        outcome.fetched = true;

        let keys = match self.store.list_server_keys(&server.id, &KeyStatus::LIVE).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(server_id = %server.id, error = %e, "Failed to load server keys");
                outcome
                    .errors
                    .push(JobError::server(&server.id, format!("{:#}", e)));
                return outcome;
            }
        };

        let counters = &metrics.bytes_transferred_by_user_id;
        for key in keys {
            let Some(&current) = counters.get(&key.remote_key_id) else {
                continue;
            };

            match self.store.record_usage(&key.id, current, now).await {
                Ok(snapshot) => {
                    debug!(
                        key_id = %key.id,
                        value = snapshot.value,
                        delta = snapshot.delta,
                        "Recorded usage snapshot"
                    );
                    outcome.keys_updated += 1;
                }
                Err(e) => {
                    warn!(server_id = %server.id, key_id = %key.id, error = %e, "Failed to record usage");
                    outcome.errors.push(JobError::key(
                        Some(&server.id),
                        &key.id,
                        format!("{:#}", e),
                    ));
                }
            }
        }

        outcome
    }
}
