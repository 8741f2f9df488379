//! Server reachability models

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::HealthDefaults;

/// Upper bound on how early a check may run and still count as due
pub const DUE_GRACE_SECS: i64 = 30;

/// Last observed reachability of a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Up,
    Down,
    Slow,
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Up => "UP",
            HealthStatus::Down => "DOWN",
            HealthStatus::Slow => "SLOW",
            HealthStatus::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "UP" => Some(HealthStatus::Up),
            "DOWN" => Some(HealthStatus::Down),
            "SLOW" => Some(HealthStatus::Slow),
            "UNKNOWN" => Some(HealthStatus::Unknown),
            _ => None,
        }
    }

    /// Classify a probe: any error is DOWN, latency above the threshold is SLOW
    pub fn classify(probe_ok: bool, latency_ms: u64, threshold_ms: u64) -> Self {
        if !probe_ok {
            HealthStatus::Down
        } else if latency_ms > threshold_ms {
            HealthStatus::Slow
        } else {
            HealthStatus::Up
        }
    }

    /// Whether moving from `previous` to `self` crosses the outage edge.
    ///
    /// SLOW and UP are both reachable, so only transitions into or out of DOWN count.
    pub fn is_outage_edge(&self, previous: HealthStatus) -> bool {
        (previous == HealthStatus::Down) != (*self == HealthStatus::Down)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Uptime percentage rounded to two decimals; 100% before the first check
pub fn uptime_percent(successful: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    let ratio = successful as f64 / total as f64 * 100.0;
    (ratio * 100.0).round() / 100.0
}

/// Rolling health statistics for one server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    pub server_id: String,
    pub checks_enabled: bool,
    pub interval_minutes: u32,
    pub notify_cooldown_minutes: u32,
    pub latency_threshold_ms: u64,
    pub last_status: HealthStatus,
    pub last_latency_ms: Option<u64>,
    pub total_checks: u64,
    pub successful_checks: u64,
    pub failed_checks: u64,
    pub uptime_percent: f64,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_notified_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HealthRecord {
    /// A fresh record for a server that has never been probed
    pub fn with_defaults(server_id: &str, defaults: &HealthDefaults, now: DateTime<Utc>) -> Self {
        Self {
            server_id: server_id.to_string(),
            checks_enabled: true,
            interval_minutes: defaults.interval_minutes,
            notify_cooldown_minutes: defaults.notify_cooldown_minutes,
            latency_threshold_ms: defaults.latency_threshold_ms,
            last_status: HealthStatus::Unknown,
            last_latency_ms: None,
            total_checks: 0,
            successful_checks: 0,
            failed_checks: 0,
            uptime_percent: uptime_percent(0, 0),
            last_checked_at: None,
            last_notified_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the per-server interval has elapsed since the last check.
    ///
    /// A run up to a tenth of the interval early (at most [`DUE_GRACE_SECS`])
    /// still counts, so a trigger cadence equal to the interval never skips.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        let Some(last) = self.last_checked_at else {
            return true;
        };
        let interval = Duration::minutes(i64::from(self.interval_minutes));
        let grace = (interval / 10).min(Duration::seconds(DUE_GRACE_SECS));
        now - last >= interval - grace
    }

    /// Fold one check into the rolling counters, returning the previous status
    pub fn record_check(
        &mut self,
        status: HealthStatus,
        latency_ms: Option<u64>,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> HealthStatus {
        let previous = self.last_status;

        self.total_checks = self.total_checks.saturating_add(1);
        if status == HealthStatus::Down {
            self.failed_checks = self.failed_checks.saturating_add(1);
        } else {
            self.successful_checks = self.successful_checks.saturating_add(1);
        }
        self.uptime_percent = uptime_percent(self.successful_checks, self.total_checks);
        self.last_status = status;
        self.last_latency_ms = latency_ms;
        self.last_error = error;
        self.last_checked_at = Some(now);
        self.updated_at = now;

        previous
    }
}
