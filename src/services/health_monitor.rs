//! Server health probing
//!
//! Every active server gets a health record on first sight. Servers whose
//! checks are enabled and whose interval has elapsed are probed concurrently;
//! operators are alerted only when a server crosses into or out of DOWN.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use super::notification::{Notification, NotificationDispatcher};
use super::remote_server::RemoteServerConnector;
use crate::db::Store;
use crate::models::{
    EngineSettings, HealthRecord, HealthStatus, HealthSummary, JobError, Server,
};

pub struct HealthMonitor {
    store: Arc<dyn Store>,
    connector: Arc<dyn RemoteServerConnector>,
    dispatcher: Arc<NotificationDispatcher>,
    max_concurrent: usize,
}

struct Checked {
    status: HealthStatus,
    alerted: bool,
    errors: Vec<JobError>,
}

impl HealthMonitor {
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

    pub async fn run(&self) -> Result<HealthSummary> {
        self.run_at(Utc::now()).await
    }

    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<HealthSummary> {
        let settings = self
            .store
            .load_settings()
            .await
            .context("Failed to load engine settings")?;
        let servers = self
            .store
            .list_active_servers()
            .await
            .context("Failed to load active servers")?;

        let mut summary = HealthSummary::default();
        let mut due = Vec::new();

        for server in servers {
            let record = match self.ensure_record(&server, &settings, now).await {
                Ok((record, created)) => {
                    if created {
                        summary.records_created += 1;
                    }
                    record
                }
                Err(e) => {
                    error!(server_id = %server.id, error = %e, "Failed to load health record");
                    summary
                        .errors
                        .push(JobError::server(&server.id, format!("{:#}", e)));
                    continue;
                }
            };

            if record.checks_enabled && record.is_due(now) {
                due.push((server, record));
            } else {
                summary.skipped += 1;
            }
        }

        let enabled = settings.notifications_enabled;
        let results: Vec<Checked> = stream::iter(due)
            .map(|(server, record)| async move { self.check(server, record, now, enabled).await })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        for result in results {
            summary.servers_checked += 1;
            match result.status {
                HealthStatus::Up => summary.up += 1,
                HealthStatus::Slow => summary.slow += 1,
                HealthStatus::Down => summary.down += 1,
                HealthStatus::Unknown => {}
            }
            if result.alerted {
                summary.alerts_sent += 1;
            }
            summary.errors.extend(result.errors);
        }

        info!(
            checked = summary.servers_checked,
            skipped = summary.skipped,
            up = summary.up,
            slow = summary.slow,
            down = summary.down,
            alerts = summary.alerts_sent,
            "Health check complete"
        );

        Ok(summary)
    }

    async fn ensure_record(
        &self,
        server: &Server,
        settings: &EngineSettings,
        now: DateTime<Utc>,
    ) -> Result<(HealthRecord, bool)> {
        if let Some(record) = self.store.get_health_record(&server.id).await? {
            return Ok((record, false));
        }

        let fresh = HealthRecord::with_defaults(&server.id, &settings.health, now);
        if self.store.create_health_record(&fresh).await? {
            debug!(server_id = %server.id, "Created health record");
            return Ok((fresh, true));
        }

        // Lost the insert race; use whatever won
        let record = self
            .store
            .get_health_record(&server.id)
            .await?
            .unwrap_or(fresh);
        Ok((record, false))
    }

    async fn check(
        &self,
        server: Server,
        mut record: HealthRecord,
        now: DateTime<Utc>,
        enabled: bool,
    ) -> Checked {
        let (status, latency_ms, probe_error) = match self.connector.connect(&server) {
            Ok(api) => {
                let probe = api.probe().await;
                match probe.result {
                    Ok(_) => (
                        HealthStatus::classify(true, probe.latency_ms, record.latency_threshold_ms),
                        Some(probe.latency_ms),
                        None,
                    ),
                    Err(e) => (HealthStatus::Down, None, Some(e.to_string())),
                }
            }
            Err(e) => (HealthStatus::Down, None, Some(e.to_string())),
        };

        let mut errors = Vec::new();
        if let Some(message) = &probe_error {
            warn!(server_id = %server.id, server = %server.name, error = %message, "Health probe failed");
            errors.push(JobError::server(&server.id, format!("probe: {}", message)));
        }

        let previous = record.record_check(status, latency_ms, probe_error.clone(), now);
        let edge = status.is_outage_edge(previous);
        if edge {
            record.last_notified_at = Some(now);
        }

        if let Err(e) = self.store.save_health_record(&record).await {
            error!(server_id = %server.id, error = %e, "Failed to save health record");
            errors.push(JobError::server(&server.id, format!("{:#}", e)));
            return Checked {
                status,
                alerted: false,
                errors,
            };
        }

        if edge {
            let notification = if status == HealthStatus::Down {
                Notification::server_down(&server, probe_error.as_deref())
            } else {
                Notification::server_recovered(&server, status, latency_ms)
            };
            info!(
                server_id = %server.id,
                from = %previous,
                to = %status,
                "Server health changed"
            );
            self.dispatcher.notify_operators(&notification, enabled).await;
        }

        Checked {
            status,
            alerted: edge,
            errors,
        }
    }
}
