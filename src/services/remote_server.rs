//! Remote server management API client
//!
//! Typed client for one VPN server's management API (Outline-compatible).
//! A client is built per server per job pass and holds no state beyond the
//! HTTP connection pool.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use super::tls;
use crate::config::RemoteConfig;
use crate::models::Server;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Failed to connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("{url} returned HTTP {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("Invalid server configuration: {0}")]
    InvalidConfiguration(String),
}

impl RemoteError {
    fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteError::Timeout {
                url: url.to_string(),
            }
        } else if err.is_connect() {
            RemoteError::Connect {
                url: url.to_string(),
                message: err.to_string(),
            }
        } else if err.is_decode() {
            RemoteError::Decode {
                url: url.to_string(),
                message: err.to_string(),
            }
        } else {
            RemoteError::Request {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            RemoteError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

// ============================================================================
// Wire types
// ============================================================================

/// `GET /server`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub name: String,
    pub server_id: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub metrics_enabled: bool,
    #[serde(default)]
    pub created_timestamp_ms: Option<u64>,
    #[serde(default)]
    pub port_for_new_access_keys: Option<u16>,
    #[serde(default)]
    pub hostname_for_access_keys: Option<String>,
    #[serde(default)]
    pub access_key_data_limit: Option<DataLimit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataLimit {
    pub bytes: u64,
}

/// One credential as reported by the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAccessKey {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub access_url: Option<String>,
    #[serde(default)]
    pub data_limit: Option<DataLimit>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessKeyList {
    access_keys: Vec<RemoteAccessKey>,
}

/// `GET /metrics/transfer`: cumulative bytes per remote credential id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferMetrics {
    pub bytes_transferred_by_user_id: HashMap<String, u64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateAccessKeyRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<DataLimit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The credential did not exist; treated as success
    AlreadyAbsent,
}

/// Result of a timed liveness probe
#[derive(Debug)]
pub struct Probe {
    pub latency_ms: u64,
    pub result: Result<ServerInfo, RemoteError>,
}

// ============================================================================
// API seam
// ============================================================================

/// Management operations on one remote server
#[async_trait]
pub trait RemoteServerApi: Send + Sync {
    async fn server_info(&self) -> Result<ServerInfo, RemoteError>;

    async fn list_access_keys(&self) -> Result<Vec<RemoteAccessKey>, RemoteError>;

    async fn get_access_key(&self, id: &str) -> Result<Option<RemoteAccessKey>, RemoteError>;

    async fn create_access_key(
        &self,
        req: &CreateAccessKeyRequest,
    ) -> Result<RemoteAccessKey, RemoteError>;

    /// Idempotent: an absent credential is reported as [`DeleteOutcome::AlreadyAbsent`]
    async fn delete_access_key(&self, id: &str) -> Result<DeleteOutcome, RemoteError>;

    async fn rename_access_key(&self, id: &str, name: &str) -> Result<(), RemoteError>;

    async fn set_data_limit(&self, id: &str, bytes: u64) -> Result<(), RemoteError>;

    async fn remove_data_limit(&self, id: &str) -> Result<(), RemoteError>;

    async fn transfer_metrics(&self) -> Result<TransferMetrics, RemoteError>;

    /// Fetch server info and measure the round trip
    async fn probe(&self) -> Probe {
        let started = Instant::now();
        let result = self.server_info().await;
        Probe {
            latency_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            result,
        }
    }
}

/// Builds one API handle per server
pub trait RemoteServerConnector: Send + Sync {
    fn connect(&self, server: &Server) -> Result<Box<dyn RemoteServerApi>, RemoteError>;
}

/// Connector producing HTTP clients from the remote configuration
#[derive(Debug, Clone)]
pub struct HttpConnector {
    config: RemoteConfig,
}

impl HttpConnector {
    pub fn new(config: RemoteConfig) -> Self {
        Self { config }
    }
}

impl RemoteServerConnector for HttpConnector {
    fn connect(&self, server: &Server) -> Result<Box<dyn RemoteServerApi>, RemoteError> {
        Ok(Box::new(RemoteServerClient::new(server, &self.config)?))
    }
}

// ============================================================================
// HTTP client
// ============================================================================

pub struct RemoteServerClient {
    client: Client,
    base_url: String,
}

impl RemoteServerClient {
    pub fn new(server: &Server, config: &RemoteConfig) -> Result<Self, RemoteError> {
        let base_url = server.api_url.trim_end_matches('/').to_string();
        if !base_url.starts_with("https://") && !base_url.starts_with("http://") {
            return Err(RemoteError::InvalidConfiguration(format!(
                "API URL for server {} must be http(s): {}",
                server.id, server.api_url
            )));
        }

        let mut builder = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .use_rustls_tls();

        builder = match server.cert_sha256.as_deref() {
            Some(fingerprint) => builder.use_preconfigured_tls(tls::pinned_client_config(fingerprint)?),
            None if config.accept_invalid_certs => builder.danger_accept_invalid_certs(true),
            None => builder,
        };

        let client = builder.build().map_err(|e| {
            RemoteError::InvalidConfiguration(format!("Failed to build HTTP client: {}", e))
        })?;

        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn key_url(&self, id: &str, suffix: &str) -> String {
        self.url(&format!("access-keys/{}{}", urlencoding::encode(id), suffix))
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> Result<Response, RemoteError> {
        debug!(url = %url, "Remote request");
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(response: Response, url: &str) -> Result<T, RemoteError> {
        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::from_reqwest(url, e))?;
        serde_json::from_str(&body).map_err(|e| RemoteError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T, RemoteError> {
        let response = self.send(self.client.get(&url), &url).await?;
        Self::decode(response, &url).await
    }
}

#[async_trait]
impl RemoteServerApi for RemoteServerClient {
    async fn server_info(&self) -> Result<ServerInfo, RemoteError> {
        self.get_json(self.url("server")).await
    }

    async fn list_access_keys(&self) -> Result<Vec<RemoteAccessKey>, RemoteError> {
        let list: AccessKeyList = self.get_json(self.url("access-keys")).await?;
        Ok(list.access_keys)
    }

    async fn get_access_key(&self, id: &str) -> Result<Option<RemoteAccessKey>, RemoteError> {
        match self.get_json(self.key_url(id, "")).await {
            Ok(key) => Ok(Some(key)),
            Err(err) if err.status_code() == Some(404) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn create_access_key(
        &self,
        req: &CreateAccessKeyRequest,
    ) -> Result<RemoteAccessKey, RemoteError> {
        let url = self.url("access-keys");
        let response = self.send(self.client.post(&url).json(req), &url).await?;
        Self::decode(response, &url).await
    }

    async fn delete_access_key(&self, id: &str) -> Result<DeleteOutcome, RemoteError> {
        let url = self.key_url(id, "");
        match self.send(self.client.delete(&url), &url).await {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(err) if err.status_code() == Some(StatusCode::NOT_FOUND.as_u16()) => {
                Ok(DeleteOutcome::AlreadyAbsent)
            }
            Err(err) => Err(err),
        }
    }

    async fn rename_access_key(&self, id: &str, name: &str) -> Result<(), RemoteError> {
        let url = self.key_url(id, "/name");
        self.send(self.client.put(&url).json(&json!({ "name": name })), &url)
            .await?;
        Ok(())
    }

    async fn set_data_limit(&self, id: &str, bytes: u64) -> Result<(), RemoteError> {
        let url = self.key_url(id, "/data-limit");
        let body = json!({ "limit": DataLimit { bytes } });
        self.send(self.client.put(&url).json(&body), &url).await?;
        Ok(())
    }

    async fn remove_data_limit(&self, id: &str) -> Result<(), RemoteError> {
        let url = self.key_url(id, "/data-limit");
        self.send(self.client.delete(&url), &url).await?;
        Ok(())
    }

    async fn transfer_metrics(&self) -> Result<TransferMetrics, RemoteError> {
        self.get_json(self.url("metrics/transfer")).await
    }
}
