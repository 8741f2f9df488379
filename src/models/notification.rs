//! Notification audit models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event that triggered a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    BandwidthWarning,
    BandwidthCritical,
    KeyDisabled,
    ExpirationWarning,
    KeyExpired,
    KeyDepleted,
    ServerDown,
    ServerRecovered,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::BandwidthWarning => "bandwidth_warning",
            NotificationKind::BandwidthCritical => "bandwidth_critical",
            NotificationKind::KeyDisabled => "key_disabled",
            NotificationKind::ExpirationWarning => "expiration_warning",
            NotificationKind::KeyExpired => "key_expired",
            NotificationKind::KeyDepleted => "key_depleted",
            NotificationKind::ServerDown => "server_down",
            NotificationKind::ServerRecovered => "server_recovered",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bandwidth_warning" => Some(NotificationKind::BandwidthWarning),
            "bandwidth_critical" => Some(NotificationKind::BandwidthCritical),
            "key_disabled" => Some(NotificationKind::KeyDisabled),
            "expiration_warning" => Some(NotificationKind::ExpirationWarning),
            "key_expired" => Some(NotificationKind::KeyExpired),
            "key_depleted" => Some(NotificationKind::KeyDepleted),
            "server_down" => Some(NotificationKind::ServerDown),
            "server_recovered" => Some(NotificationKind::ServerRecovered),
            _ => None,
        }
    }

    /// Severity label used by channels that color or tag messages
    pub fn severity(&self) -> &'static str {
        match self {
            NotificationKind::BandwidthCritical
            | NotificationKind::KeyDisabled
            | NotificationKind::ServerDown => "critical",
            NotificationKind::BandwidthWarning | NotificationKind::ExpirationWarning => "warning",
            NotificationKind::KeyExpired
            | NotificationKind::KeyDepleted
            | NotificationKind::ServerRecovered => "info",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Aggregate delivery result across all targeted channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Sent,
    Partial,
    Failed,
    /// Notifications are globally disabled or no channel was targeted
    Skipped,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Sent => "sent",
            DeliveryOutcome::Partial => "partial",
            DeliveryOutcome::Failed => "failed",
            DeliveryOutcome::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(DeliveryOutcome::Sent),
            "partial" => Some(DeliveryOutcome::Partial),
            "failed" => Some(DeliveryOutcome::Failed),
            "skipped" => Some(DeliveryOutcome::Skipped),
            _ => None,
        }
    }

    pub fn from_counts(delivered: usize, failed: usize) -> Self {
        match (delivered, failed) {
            (0, 0) => DeliveryOutcome::Skipped,
            (_, 0) => DeliveryOutcome::Sent,
            (0, _) => DeliveryOutcome::Failed,
            _ => DeliveryOutcome::Partial,
        }
    }
}

/// A logged notification attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    pub kind: NotificationKind,
    pub message: String,
    pub outcome: DeliveryOutcome,
    pub key_id: Option<String>,
    pub server_id: Option<String>,
    pub delivered_channels: u32,
    pub failed_channels: u32,
    pub created_at: DateTime<Utc>,
}

/// Notification attempt to append to the log
#[derive(Debug, Clone)]
pub struct NewNotificationRecord {
    pub kind: NotificationKind,
    pub message: String,
    pub outcome: DeliveryOutcome,
    pub key_id: Option<String>,
    pub server_id: Option<String>,
    pub delivered_channels: u32,
    pub failed_channels: u32,
}
