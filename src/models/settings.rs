//! Persisted engine settings

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Raw settings row (key-value)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Setting {
    pub key: String,
    pub value: String,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub const WARNING_PERIOD_DAYS: &str = "expiration.warning_period_days";
pub const NOTIFICATIONS_ENABLED: &str = "notifications.enabled";
pub const HEALTH_INTERVAL_MINUTES: &str = "health.default_interval_minutes";
pub const HEALTH_NOTIFY_COOLDOWN_MINUTES: &str = "health.default_notify_cooldown_minutes";
pub const HEALTH_LATENCY_THRESHOLD_MS: &str = "health.default_latency_threshold_ms";

/// Defaults applied to lazily created health records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthDefaults {
    pub interval_minutes: u32,
    pub notify_cooldown_minutes: u32,
    pub latency_threshold_ms: u64,
}

impl Default for HealthDefaults {
    fn default() -> Self {
        Self {
            interval_minutes: 5,
            notify_cooldown_minutes: 30,
            latency_threshold_ms: 500,
        }
    }
}

/// Typed view of the settings table, read once per job invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    pub warning_period_days: u32,
    pub notifications_enabled: bool,
    pub health: HealthDefaults,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            warning_period_days: 3,
            notifications_enabled: true,
            health: HealthDefaults::default(),
        }
    }
}

impl EngineSettings {
    /// Create from settings key-value pairs.
    ///
    /// Unknown keys are ignored; unparseable values keep the default.
    pub fn from_settings(settings: &[(String, String)]) -> Self {
        let defaults = Self::default();
        let get_value = |key: &str| -> Option<&str> {
            settings
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.trim())
        };

        Self {
            warning_period_days: parse_or(
                WARNING_PERIOD_DAYS,
                get_value(WARNING_PERIOD_DAYS),
                defaults.warning_period_days,
            ),
            notifications_enabled: parse_or(
                NOTIFICATIONS_ENABLED,
                get_value(NOTIFICATIONS_ENABLED),
                defaults.notifications_enabled,
            ),
            health: HealthDefaults {
                interval_minutes: parse_or(
                    HEALTH_INTERVAL_MINUTES,
                    get_value(HEALTH_INTERVAL_MINUTES),
                    defaults.health.interval_minutes,
                )
                .max(1),
                notify_cooldown_minutes: parse_or(
                    HEALTH_NOTIFY_COOLDOWN_MINUTES,
                    get_value(HEALTH_NOTIFY_COOLDOWN_MINUTES),
                    defaults.health.notify_cooldown_minutes,
                ),
                latency_threshold_ms: parse_or(
                    HEALTH_LATENCY_THRESHOLD_MS,
                    get_value(HEALTH_LATENCY_THRESHOLD_MS),
                    defaults.health.latency_threshold_ms,
                ),
            },
        }
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, raw: Option<&str>, default: T) -> T {
    match raw {
        None => default,
        Some(value) => value.parse().unwrap_or_else(|_| {
            tracing::warn!(setting = key, value, "Unparseable setting, using default");
            default
        }),
    }
}
