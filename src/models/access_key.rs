//! Access key models
//!
//! An access key is a leased credential on exactly one remote server. Its status
//! only moves forward:
//!
//! ```text
//! PENDING/ACTIVE --(expiry passed)--> EXPIRED
//! ACTIVE --(quota used up)--> DEPLETED
//! EXPIRED/DEPLETED --(archival sweep)--> archived copy, live row deleted
//! ```

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an access key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyStatus {
    Pending,
    Active,
    Expired,
    Depleted,
    Disabled,
}

impl KeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStatus::Pending => "PENDING",
            KeyStatus::Active => "ACTIVE",
            KeyStatus::Expired => "EXPIRED",
            KeyStatus::Depleted => "DEPLETED",
            KeyStatus::Disabled => "DISABLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(KeyStatus::Pending),
            "ACTIVE" => Some(KeyStatus::Active),
            "EXPIRED" => Some(KeyStatus::Expired),
            "DEPLETED" => Some(KeyStatus::Depleted),
            "DISABLED" => Some(KeyStatus::Disabled),
            _ => None,
        }
    }

    /// Statuses that still receive usage updates and lifecycle checks
    pub const LIVE: [KeyStatus; 2] = [KeyStatus::Pending, KeyStatus::Active];

    /// Statuses awaiting the archival sweep
    pub const SETTLING: [KeyStatus; 2] = [KeyStatus::Expired, KeyStatus::Depleted];
}

impl std::fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Bandwidth alert thresholds with a one-shot flag on the key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BandwidthThreshold {
    /// 80% of quota
    Warning,
    /// 90% of quota
    Critical,
}

impl BandwidthThreshold {
    pub fn percent(&self) -> u8 {
        match self {
            BandwidthThreshold::Warning => 80,
            BandwidthThreshold::Critical => 90,
        }
    }
}

/// A live access key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessKey {
    pub id: String,
    pub server_id: String,
    /// Credential identifier on the remote server
    pub remote_key_id: String,
    pub name: String,
    pub status: KeyStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub data_limit_bytes: Option<u64>,
    /// Mirrors the latest absolute counter read from the remote server
    pub used_bytes: u64,
    pub alert_80_sent: bool,
    pub alert_90_sent: bool,
    pub auto_disable_on_limit: bool,
    pub contact_handle: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub last_warning_at: Option<DateTime<Utc>>,
    /// Set when the quota cutoff disabled the key
    pub disabled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccessKey {
    /// Usage as a percentage of quota, `None` for unlimited keys
    pub fn usage_percent(&self) -> Option<f64> {
        let limit = self.data_limit_bytes?;
        if limit == 0 {
            return Some(if self.used_bytes == 0 { 100.0 } else { f64::INFINITY });
        }
        Some(self.used_bytes as f64 / limit as f64 * 100.0)
    }

    /// Whether usage has reached `percent` of the quota
    ///
    /// Compared in u128 so that `used * 100` cannot overflow.
    pub fn usage_reached(&self, percent: u8) -> bool {
        match self.data_limit_bytes {
            Some(limit) => u128::from(self.used_bytes) * 100 >= u128::from(limit) * u128::from(percent),
            None => false,
        }
    }

    pub fn quota_exhausted(&self) -> bool {
        self.usage_reached(100)
    }

    pub fn flag_set(&self, threshold: BandwidthThreshold) -> bool {
        match threshold {
            BandwidthThreshold::Warning => self.alert_80_sent,
            BandwidthThreshold::Critical => self.alert_90_sent,
        }
    }
}

/// Provisioning request for a key (used by administration and tests)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewAccessKey {
    pub server_id: String,
    pub remote_key_id: String,
    pub name: String,
    #[serde(default)]
    pub status: Option<KeyStatus>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data_limit_bytes: Option<u64>,
    #[serde(default)]
    pub used_bytes: u64,
    #[serde(default)]
    pub alert_80_sent: bool,
    #[serde(default)]
    pub alert_90_sent: bool,
    #[serde(default)]
    pub auto_disable_on_limit: bool,
    #[serde(default)]
    pub contact_handle: Option<String>,
    #[serde(default)]
    pub telegram_chat_id: Option<String>,
}

/// Why a key left the live table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArchiveReason {
    Expired,
    Depleted,
}

impl ArchiveReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveReason::Expired => "EXPIRED",
            ArchiveReason::Depleted => "DEPLETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "EXPIRED" => Some(ArchiveReason::Expired),
            "DEPLETED" => Some(ArchiveReason::Depleted),
            _ => None,
        }
    }

    /// Archive reason for a settling status
    pub fn for_status(status: KeyStatus) -> Option<Self> {
        match status {
            KeyStatus::Expired => Some(ArchiveReason::Expired),
            KeyStatus::Depleted => Some(ArchiveReason::Depleted),
            _ => None,
        }
    }
}

impl std::fmt::Display for ArchiveReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Months an archived key is retained
pub const ARCHIVE_RETENTION_MONTHS: u32 = 3;

/// Retention deadline for an archive row created at `archived_at`
pub fn retention_until(archived_at: DateTime<Utc>) -> DateTime<Utc> {
    archived_at
        .checked_add_months(Months::new(ARCHIVE_RETENTION_MONTHS))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Immutable copy of a settled key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedKey {
    pub id: String,
    pub original_key_id: String,
    pub server_id: String,
    pub remote_key_id: String,
    pub name: String,
    pub archive_reason: ArchiveReason,
    pub expires_at: Option<DateTime<Utc>>,
    pub data_limit_bytes: Option<u64>,
    pub used_bytes: u64,
    pub contact_handle: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub disabled_at: Option<DateTime<Utc>>,
    pub key_created_at: DateTime<Utc>,
    pub archived_at: DateTime<Utc>,
    pub retention_until: DateTime<Utc>,
}
