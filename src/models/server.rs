//! Remote VPN server models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A remote VPN server exposing a management API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: String,
    pub name: String,
    /// Management API root, including the secret path prefix
    pub api_url: String,
    /// SHA-256 fingerprint of the server's self-signed certificate (hex)
    pub cert_sha256: Option<String>,
    /// Inactive servers are excluded from every reconciliation job
    pub is_active: bool,
    pub location: Option<String>,
    pub country_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to register a server
#[derive(Debug, Clone, Deserialize)]
pub struct NewServer {
    pub name: String,
    pub api_url: String,
    #[serde(default)]
    pub cert_sha256: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
}
