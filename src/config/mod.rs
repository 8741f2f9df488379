//! Configuration management
//!
//! This module provides YAML-based configuration management with support for:
//! - Environment variable overrides
//! - Multiple configuration file locations
//! - Default values for all settings
//! - Operator notification channels
//!
//! Engine tunables that operators change at runtime (warning period, global
//! notification switch, health defaults) live in the database `settings` table
//! and are read through [`crate::models::EngineSettings`] instead.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

/// Server configuration for the job trigger API
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bearer secret required on job routes (open when unset)
    #[serde(default)]
    pub cron_secret: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cron_secret: None,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// How long a connection waits on a locked database before failing
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_secs: u64,
}

fn default_database_url() -> String {
    "sqlite://./data/keyfleet.db".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

fn default_busy_timeout() -> u64 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            busy_timeout_secs: default_busy_timeout(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Log output target (console or file)
    #[serde(default)]
    pub target: LogTarget,
    /// Directory for log files (used when target is "file" or "both")
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_log_prefix")]
    pub log_prefix: String,
    /// Rotate log files daily; a single file is used otherwise
    #[serde(default = "default_log_rotation")]
    pub daily_rotation: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

/// Log output target
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    #[default]
    Console,
    File,
    Both,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/keyfleet")
}

fn default_log_prefix() -> String {
    "keyfleet".to_string()
}

fn default_log_rotation() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            target: LogTarget::default(),
            log_dir: default_log_dir(),
            log_prefix: default_log_prefix(),
            daily_rotation: default_log_rotation(),
        }
    }
}

/// Remote management API client settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteConfig {
    /// Per-request timeout; calls are never retried within a pass
    #[serde(default = "default_remote_timeout")]
    pub timeout_secs: u64,
    /// Servers processed in parallel within one job pass
    #[serde(default = "default_max_concurrent_servers")]
    pub max_concurrent_servers: usize,
    /// Skip certificate verification for servers without a pinned fingerprint
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

fn default_remote_timeout() -> u64 {
    30
}

fn default_max_concurrent_servers() -> usize {
    8
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_remote_timeout(),
            max_concurrent_servers: default_max_concurrent_servers(),
            accept_invalid_certs: false,
        }
    }
}

/// Outbound notification configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NotificationsConfig {
    /// Bot token used for per-key Telegram contacts and Telegram operator channels
    #[serde(default)]
    pub telegram_bot_token: Option<String>,
    /// Channels that receive every notification
    #[serde(default)]
    pub operator_channels: Vec<ChannelConfig>,
}

/// One operator channel
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChannelConfig {
    Telegram {
        chat_id: String,
        /// Overrides `notifications.telegram_bot_token`
        #[serde(default)]
        bot_token: Option<String>,
    },
    Webhook {
        url: String,
        #[serde(default = "default_webhook_method")]
        method: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    Email {
        smtp_host: String,
        #[serde(default = "default_smtp_port")]
        smtp_port: u16,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
        from: String,
        to: Vec<String>,
        #[serde(default = "default_use_tls")]
        use_tls: bool,
    },
}

fn default_webhook_method() -> String {
    "POST".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_use_tls() -> bool {
    true
}

impl ChannelConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelConfig::Telegram { .. } => "telegram",
            ChannelConfig::Webhook { .. } => "webhook",
            ChannelConfig::Email { .. } => "email",
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            remote: RemoteConfig::default(),
            notifications: NotificationsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values
    /// 2. Configuration file (YAML)
    /// 3. Environment variables (prefixed with KEYFLEET_)
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let config_path = std::env::var("KEYFLEET_CONFIG")
            .map(PathBuf::from)
            .ok()
            .or_else(Self::find_config_file);

        Self::load_from(config_path)
    }

    /// Load configuration from an explicit path, falling back to defaults when absent
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let mut config = match config_path {
            Some(ref path) if path.exists() => {
                eprintln!("[CONFIG] Loading configuration from: {:?}", path);
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {:?}", path))?;
                Self::from_yaml(&contents)
                    .with_context(|| format!("Failed to parse config file: {:?}", path))?
            }
            Some(ref path) => {
                eprintln!("[CONFIG] Config file not found: {:?}, using defaults", path);
                AppConfig::default()
            }
            None => {
                eprintln!("[CONFIG] No config file found, using defaults");
                AppConfig::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_norway::from_str(contents).context("Invalid configuration YAML")
    }

    /// Find the configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            PathBuf::from("config.yaml"),
            PathBuf::from("config/config.yaml"),
            PathBuf::from("/etc/keyfleet/config.yaml"),
            dirs::config_dir()
                .map(|p| p.join("keyfleet/config.yaml"))
                .unwrap_or_default(),
        ];

        paths.into_iter().find(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("KEYFLEET_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("KEYFLEET_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }
        if let Ok(secret) = std::env::var("KEYFLEET_CRON_SECRET") {
            self.server.cron_secret = Some(secret).filter(|s| !s.is_empty());
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("KEYFLEET_LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "compact" => LogFormat::Compact,
                _ => LogFormat::Pretty,
            };
        }
        if let Ok(target) = std::env::var("KEYFLEET_LOG_TARGET") {
            self.logging.target = match target.to_lowercase().as_str() {
                "file" => LogTarget::File,
                "both" => LogTarget::Both,
                _ => LogTarget::Console,
            };
        }
        if let Ok(dir) = std::env::var("KEYFLEET_LOG_DIR") {
            self.logging.log_dir = PathBuf::from(dir);
        }

        if let Ok(token) = std::env::var("KEYFLEET_TELEGRAM_BOT_TOKEN") {
            self.notifications.telegram_bot_token = Some(token).filter(|s| !s.is_empty());
        }
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.remote.timeout_secs == 0 {
            anyhow::bail!("remote.timeout_secs must be greater than 0");
        }

        if self.remote.max_concurrent_servers == 0 {
            anyhow::bail!("remote.max_concurrent_servers must be greater than 0");
        }

        for channel in &self.notifications.operator_channels {
            match channel {
                ChannelConfig::Telegram { bot_token, .. } => {
                    if bot_token.is_none() && self.notifications.telegram_bot_token.is_none() {
                        anyhow::bail!(
                            "Telegram operator channel requires notifications.telegram_bot_token or its own bot_token"
                        );
                    }
                }
                ChannelConfig::Webhook { url, .. } => {
                    if !url.starts_with("http://") && !url.starts_with("https://") {
                        anyhow::bail!("Invalid webhook URL: {}", url);
                    }
                }
                ChannelConfig::Email { to, .. } => {
                    if to.is_empty() {
                        anyhow::bail!("Email operator channel needs at least one recipient");
                    }
                }
            }
        }

        if self.remote.accept_invalid_certs {
            tracing::warn!(
                "remote.accept_invalid_certs is enabled; servers without a pinned fingerprint are not verified"
            );
        }

        Ok(())
    }
}
