//! Test fixtures for common test data
//!
//! [`TestEnv`] wires the real jobs to a SQLite store (in-memory by default), a
//! [`FakeConnector`] and recording channels.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use keyfleet::config::DatabaseConfig;
use keyfleet::db::{self, SqliteStore, Store};
use keyfleet::models::{AccessKey, NewAccessKey, NewServer, Server};
use keyfleet::services::notification::{NotificationChannel, NotificationDispatcher};
use keyfleet::Engine;

use super::mocks::{FakeConnector, FakeServer, RecordingChannel, RecordingContacts};

pub const GIB: u64 = 1024 * 1024 * 1024;

/// Single-connection in-memory database config
pub fn memory_database() -> DatabaseConfig {
    DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        min_connections: 1,
        connect_timeout_secs: 5,
        idle_timeout_secs: 60,
        busy_timeout_secs: 5,
    }
}

/// File-backed database config with a multi-connection pool
pub fn file_database(dir: &Path, max_connections: u32) -> DatabaseConfig {
    DatabaseConfig {
        url: format!("sqlite://{}", dir.join("keyfleet.db").display()),
        max_connections,
        ..memory_database()
    }
}

pub async fn memory_store() -> SqliteStore {
    store_for(&memory_database()).await
}

pub async fn store_for(config: &DatabaseConfig) -> SqliteStore {
    let pool = db::init_pool(config)
        .await
        .expect("Failed to initialize test database");
    SqliteStore::new(pool)
}

pub struct TestEnv {
    pub store: SqliteStore,
    pub connector: FakeConnector,
    pub operator: RecordingChannel,
    pub contacts: RecordingContacts,
    pub engine: Arc<Engine>,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_store(memory_store().await, 4).await
    }

    /// Environment over a file database shared by several pooled connections
    pub async fn file_backed(dir: &Path, max_connections: u32, max_concurrent: usize) -> Self {
        let store = store_for(&file_database(dir, max_connections)).await;
        Self::with_store(store, max_concurrent).await
    }

    async fn with_store(store: SqliteStore, max_concurrent: usize) -> Self {
        let connector = FakeConnector::new();
        let operator = RecordingChannel::new("operator");
        let contacts = RecordingContacts::new();

        let shared: Arc<dyn Store> = Arc::new(store.clone());
        let dispatcher = Arc::new(NotificationDispatcher::new(
            shared.clone(),
            vec![Arc::new(operator.clone()) as Arc<dyn NotificationChannel>],
            Arc::new(contacts.clone()),
        ));
        let engine = Arc::new(Engine::new(
            shared,
            Arc::new(connector.clone()),
            dispatcher,
            max_concurrent,
        ));

        Self {
            store,
            connector,
            operator,
            contacts,
            engine,
        }
    }

    /// Register an active server and its fake
    pub async fn server(&self, name: &str) -> (Server, FakeServer) {
        let server = self
            .store
            .servers()
            .create(&NewServer {
                name: name.to_string(),
                api_url: format!("https://{}.example.com:8443/secret", name),
                cert_sha256: None,
                location: None,
                country_code: None,
            })
            .await
            .expect("Failed to create server");
        let fake = self.connector.add(&server.id);
        (server, fake)
    }

    pub async fn key(&self, req: NewAccessKey) -> AccessKey {
        self.store
            .keys()
            .create(&req)
            .await
            .expect("Failed to create key")
    }

    pub async fn reload(&self, key: &AccessKey) -> Option<AccessKey> {
        self.store.keys().get_by_id(&key.id).await.unwrap()
    }
}

/// Key request builder with sensible defaults
pub fn new_key(server: &Server, remote_key_id: &str) -> NewAccessKey {
    NewAccessKey {
        server_id: server.id.clone(),
        remote_key_id: remote_key_id.to_string(),
        name: format!("user-{}", remote_key_id),
        telegram_chat_id: Some(format!("chat-{}", remote_key_id)),
        ..Default::default()
    }
}

pub fn quota_key(server: &Server, remote_key_id: &str, limit: u64, used: u64) -> NewAccessKey {
    NewAccessKey {
        data_limit_bytes: Some(limit),
        used_bytes: used,
        ..new_key(server, remote_key_id)
    }
}

pub fn expiring_key(server: &Server, remote_key_id: &str, expires_at: DateTime<Utc>) -> NewAccessKey {
    NewAccessKey {
        expires_at: Some(expires_at),
        ..new_key(server, remote_key_id)
    }
}

pub fn hours(n: i64) -> Duration {
    Duration::hours(n)
}
