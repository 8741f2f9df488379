//! Notification fan-out
//!
//! A notification goes to the key's own contact channel (when it has one) and
//! to every configured operator channel. Delivery failures are logged per
//! channel and never surface to the job that raised the notification.

pub mod email;
pub mod telegram;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::config::{ChannelConfig, NotificationsConfig};
use crate::db::Store;
use crate::models::{
    AccessKey, BandwidthThreshold, DeliveryOutcome, HealthStatus, NewNotificationRecord,
    NotificationKind, Server,
};

pub use email::EmailChannel;
pub use telegram::TelegramChannel;
pub use webhook::WebhookChannel;

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("Failed to send notification: {0}")]
    SendFailed(String),
    #[error("Invalid configuration for channel: {0}")]
    InvalidConfiguration(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

/// A formatted message ready for delivery
#[derive(Debug, Clone)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub key_id: Option<String>,
    pub server_id: Option<String>,
}

impl Notification {
    /// Title and body as plain text
    pub fn text(&self) -> String {
        format!("{}\n\n{}", self.title, self.body)
    }

    pub fn bandwidth(key: &AccessKey, threshold: BandwidthThreshold) -> Self {
        let (kind, title) = match threshold {
            BandwidthThreshold::Warning => {
                (NotificationKind::BandwidthWarning, "Bandwidth warning")
            }
            BandwidthThreshold::Critical => {
                (NotificationKind::BandwidthCritical, "Bandwidth critical")
            }
        };
        Self::for_key(
            key,
            kind,
            title,
            format!(
                "Key \"{}\" has used {} of its quota ({}).",
                key.name,
                format_percent(key),
                format_usage(key)
            ),
        )
    }

    pub fn key_disabled(key: &AccessKey) -> Self {
        Self::for_key(
            key,
            NotificationKind::KeyDisabled,
            "Access key disabled",
            format!(
                "Key \"{}\" reached its data limit ({}) and has been disabled.",
                key.name,
                format_usage(key)
            ),
        )
    }

    pub fn expiration_warning(key: &AccessKey, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let hours = (expires_at - now).num_hours().max(0);
        let remaining = if hours >= 24 {
            format!("{} day(s)", hours / 24)
        } else {
            format!("{} hour(s)", hours)
        };
        Self::for_key(
            key,
            NotificationKind::ExpirationWarning,
            "Access key expiring soon",
            format!(
                "Key \"{}\" expires on {} (in {}).",
                key.name,
                expires_at.format("%Y-%m-%d %H:%M UTC"),
                remaining
            ),
        )
    }

    pub fn key_expired(key: &AccessKey) -> Self {
        Self::for_key(
            key,
            NotificationKind::KeyExpired,
            "Access key expired",
            format!("Key \"{}\" has expired and will be removed.", key.name),
        )
    }

    pub fn key_depleted(key: &AccessKey) -> Self {
        Self::for_key(
            key,
            NotificationKind::KeyDepleted,
            "Access key data limit reached",
            format!(
                "Key \"{}\" has used its full quota ({}) and will be removed.",
                key.name,
                format_usage(key)
            ),
        )
    }

    pub fn server_down(server: &Server, error: Option<&str>) -> Self {
        Self::for_server(
            server,
            NotificationKind::ServerDown,
            "Server down",
            format!(
                "Server \"{}\" is unreachable: {}",
                server.name,
                error.unwrap_or("no response")
            ),
        )
    }

    pub fn server_recovered(server: &Server, status: HealthStatus, latency_ms: Option<u64>) -> Self {
        let latency = latency_ms
            .map(|ms| format!("{} ms", ms))
            .unwrap_or_else(|| "n/a".to_string());
        Self::for_server(
            server,
            NotificationKind::ServerRecovered,
            "Server recovered",
            format!(
                "Server \"{}\" is reachable again (status {}, latency {}).",
                server.name, status, latency
            ),
        )
    }

    fn for_key(key: &AccessKey, kind: NotificationKind, title: &str, body: String) -> Self {
        Self {
            kind,
            title: title.to_string(),
            body,
            key_id: Some(key.id.clone()),
            server_id: Some(key.server_id.clone()),
        }
    }

    fn for_server(server: &Server, kind: NotificationKind, title: &str, body: String) -> Self {
        Self {
            kind,
            title: title.to_string(),
            body,
            key_id: None,
            server_id: Some(server.id.clone()),
        }
    }
}

fn format_percent(key: &AccessKey) -> String {
    match key.usage_percent() {
        Some(p) if p.is_finite() => format!("{:.1}%", p),
        Some(_) => "over 100%".to_string(),
        None => "n/a".to_string(),
    }
}

fn format_usage(key: &AccessKey) -> String {
    match key.data_limit_bytes {
        Some(limit) => format!("{} of {}", format_bytes(key.used_bytes), format_bytes(limit)),
        None => format_bytes(key.used_bytes),
    }
}

/// Human-readable byte count in binary units
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

// ============================================================================
// Channels
// ============================================================================

/// One delivery target
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Short label for logs
    fn name(&self) -> String;

    async fn send(&self, notification: &Notification) -> Result<(), SenderError>;
}

/// Resolves the contact channel linked to a key
pub trait ContactChannels: Send + Sync {
    fn channel_for(&self, key: &AccessKey) -> Option<Arc<dyn NotificationChannel>>;
}

/// Routes key contacts to Telegram using the configured bot
pub struct TelegramContacts {
    client: Client,
    bot_token: Option<String>,
}

impl TelegramContacts {
    pub fn new(client: Client, bot_token: Option<String>) -> Self {
        Self { client, bot_token }
    }
}

impl ContactChannels for TelegramContacts {
    fn channel_for(&self, key: &AccessKey) -> Option<Arc<dyn NotificationChannel>> {
        let token = self.bot_token.as_deref()?;
        let chat_id = key.telegram_chat_id.as_deref()?;
        Some(Arc::new(TelegramChannel::new(
            self.client.clone(),
            token,
            chat_id,
        )))
    }
}

/// Shared HTTP client for outbound channels
pub fn http_client() -> Result<Client, SenderError> {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .use_rustls_tls()
        .build()
        .map_err(SenderError::NetworkError)
}

/// Build an operator channel from its configuration
pub fn build_channel(
    config: &ChannelConfig,
    notifications: &NotificationsConfig,
    client: &Client,
) -> Result<Arc<dyn NotificationChannel>, SenderError> {
    match config {
        ChannelConfig::Telegram { chat_id, bot_token } => {
            let token = bot_token
                .as_deref()
                .or(notifications.telegram_bot_token.as_deref())
                .ok_or_else(|| {
                    SenderError::InvalidConfiguration("Telegram channel has no bot token".to_string())
                })?;
            Ok(Arc::new(TelegramChannel::new(client.clone(), token, chat_id)))
        }
        ChannelConfig::Webhook {
            url,
            method,
            headers,
            timeout_secs,
        } => Ok(Arc::new(WebhookChannel::new(
            client.clone(),
            url,
            method,
            headers.clone(),
            *timeout_secs,
        )?)),
        ChannelConfig::Email { .. } => Ok(Arc::new(EmailChannel::from_config(config)?)),
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

pub struct NotificationDispatcher {
    store: Arc<dyn Store>,
    operators: Vec<Arc<dyn NotificationChannel>>,
    contacts: Arc<dyn ContactChannels>,
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        operators: Vec<Arc<dyn NotificationChannel>>,
        contacts: Arc<dyn ContactChannels>,
    ) -> Self {
        Self {
            store,
            operators,
            contacts,
        }
    }

    /// Build the dispatcher from configuration, skipping channels that fail to build
    pub fn from_config(store: Arc<dyn Store>, config: &NotificationsConfig) -> Result<Self, SenderError> {
        let client = http_client()?;
        let mut operators = Vec::new();
        for channel in &config.operator_channels {
            match build_channel(channel, config, &client) {
                Ok(built) => operators.push(built),
                Err(e) => warn!(channel = channel.kind(), error = %e, "Skipping operator channel"),
            }
        }

        let contacts = Arc::new(TelegramContacts::new(
            client,
            config.telegram_bot_token.clone(),
        ));

        Ok(Self::new(store, operators, contacts))
    }

    /// Send to the key's contact and all operators
    pub async fn notify_key(
        &self,
        key: &AccessKey,
        notification: &Notification,
        enabled: bool,
    ) -> DeliveryOutcome {
        let mut targets = Vec::with_capacity(self.operators.len() + 1);
        if let Some(contact) = self.contacts.channel_for(key) {
            targets.push(contact);
        }
        targets.extend(self.operators.iter().cloned());
        self.dispatch(targets, notification, enabled).await
    }

    /// Send to operators only
    pub async fn notify_operators(&self, notification: &Notification, enabled: bool) -> DeliveryOutcome {
        self.dispatch(self.operators.clone(), notification, enabled)
            .await
    }

    async fn dispatch(
        &self,
        targets: Vec<Arc<dyn NotificationChannel>>,
        notification: &Notification,
        enabled: bool,
    ) -> DeliveryOutcome {
        let (delivered, failed) = if enabled {
            let results = join_all(targets.iter().map(|channel| async move {
                let result = channel.send(notification).await;
                (channel.name(), result)
            }))
            .await;

            let mut delivered = 0usize;
            let mut failed = 0usize;
            for (name, result) in results {
                match result {
                    Ok(()) => {
                        debug!(channel = %name, kind = %notification.kind, "Notification delivered");
                        delivered += 1;
                    }
                    Err(e) => {
                        warn!(channel = %name, kind = %notification.kind, error = %e, "Notification delivery failed");
                        failed += 1;
                    }
                }
            }
            (delivered, failed)
        } else {
            debug!(kind = %notification.kind, "Notifications disabled, skipping delivery");
            (0, 0)
        };

        let outcome = DeliveryOutcome::from_counts(delivered, failed);
        let record = NewNotificationRecord {
            kind: notification.kind,
            message: notification.text(),
            outcome,
            key_id: notification.key_id.clone(),
            server_id: notification.server_id.clone(),
            delivered_channels: u32::try_from(delivered).unwrap_or(u32::MAX),
            failed_channels: u32::try_from(failed).unwrap_or(u32::MAX),
        };

        if let Err(e) = self.store.log_notification(&record).await {
            error!(kind = %notification.kind, error = %e, "Failed to write notification log");
        }

        outcome
    }
}
