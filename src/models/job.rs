//! Job summaries returned to triggers

use serde::{Deserialize, Serialize};

/// Where a failure inside a job pass was caught
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobScope {
    Server,
    Key,
    Notification,
}

/// A non-fatal failure recorded in a job summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub scope: JobScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    pub message: String,
}

impl JobError {
    pub fn server(server_id: &str, message: impl Into<String>) -> Self {
        Self {
            scope: JobScope::Server,
            server_id: Some(server_id.to_string()),
            key_id: None,
            message: message.into(),
        }
    }

    pub fn key(server_id: Option<&str>, key_id: &str, message: impl Into<String>) -> Self {
        Self {
            scope: JobScope::Key,
            server_id: server_id.map(str::to_string),
            key_id: Some(key_id.to_string()),
            message: message.into(),
        }
    }

    pub fn notification(key_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            scope: JobScope::Notification,
            server_id: None,
            key_id: key_id.map(str::to_string),
            message: message.into(),
        }
    }
}

/// Result of one usage sync pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncSummary {
    pub servers_total: usize,
    pub servers_synced: usize,
    pub keys_updated: usize,
    pub per_server_errors: Vec<JobError>,
}

/// Result of one lifecycle reconciliation pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifecycleSummary {
    pub warnings_sent: usize,
    pub expired: usize,
    pub depleted: usize,
    pub archived: usize,
    pub remote_deletions_failed: usize,
    pub errors: Vec<JobError>,
}

/// Result of one bandwidth evaluation pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BandwidthSummary {
    pub keys_checked: usize,
    pub warnings_sent: usize,
    pub critical_sent: usize,
    pub auto_disabled: usize,
    pub errors: Vec<JobError>,
}

/// Result of one health check pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthSummary {
    pub servers_checked: usize,
    /// Active servers not probed because checks are off or not yet due
    pub skipped: usize,
    pub up: usize,
    pub slow: usize,
    pub down: usize,
    pub alerts_sent: usize,
    pub records_created: usize,
    pub errors: Vec<JobError>,
}

/// Combined result of running every job in order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FullRunSummary {
    pub sync: SyncSummary,
    pub lifecycle: LifecycleSummary,
    pub bandwidth: BandwidthSummary,
    pub health: HealthSummary,
}

/// Summaries that may carry recorded failures
pub trait HasErrors {
    fn error_count(&self) -> usize;
}

impl HasErrors for SyncSummary {
    fn error_count(&self) -> usize {
        self.per_server_errors.len()
    }
}

impl HasErrors for LifecycleSummary {
    fn error_count(&self) -> usize {
        self.errors.len()
    }
}

impl HasErrors for BandwidthSummary {
    fn error_count(&self) -> usize {
        self.errors.len()
    }
}

impl HasErrors for HealthSummary {
    fn error_count(&self) -> usize {
        self.errors.len()
    }
}

impl HasErrors for FullRunSummary {
    fn error_count(&self) -> usize {
        self.sync.error_count()
            + self.lifecycle.error_count()
            + self.bandwidth.error_count()
            + self.health.error_count()
    }
}
