//! Keyfleet library
//!
//! Reconciliation engine for leased VPN access keys: usage sync, lifecycle
//! settlement, bandwidth alerts and server health, each run as an independent
//! idempotent job.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

pub mod api;
pub mod config;
pub mod db;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

pub use config::AppConfig;
pub use db::{DbPool, SqliteStore, Store};

use models::{BandwidthSummary, FullRunSummary, HealthSummary, LifecycleSummary, SyncSummary};
use services::{
    BandwidthAlertMonitor, HealthMonitor, HttpConnector, LifecycleReconciler,
    NotificationDispatcher, RemoteServerConnector, UsageSyncer,
};

/// The four jobs wired to one store, connector and dispatcher
pub struct Engine {
    pub syncer: UsageSyncer,
    pub reconciler: LifecycleReconciler,
    pub bandwidth: BandwidthAlertMonitor,
    pub health: HealthMonitor,
}

impl Engine {
    pub fn new(
        store: Arc<dyn Store>,
        connector: Arc<dyn RemoteServerConnector>,
        dispatcher: Arc<NotificationDispatcher>,
        max_concurrent_servers: usize,
    ) -> Self {
        Self {
            syncer: UsageSyncer::new(store.clone(), connector.clone(), max_concurrent_servers),
            reconciler: LifecycleReconciler::new(
                store.clone(),
                connector.clone(),
                dispatcher.clone(),
                max_concurrent_servers,
            ),
            bandwidth: BandwidthAlertMonitor::new(
                store.clone(),
                connector.clone(),
                dispatcher.clone(),
                max_concurrent_servers,
            ),
            health: HealthMonitor::new(store, connector, dispatcher, max_concurrent_servers),
        }
    }

    pub async fn sync(&self) -> Result<SyncSummary> {
        self.syncer.sync().await
    }

    pub async fn reconcile_lifecycle(&self) -> Result<LifecycleSummary> {
        self.reconciler.reconcile().await
    }

    pub async fn check_bandwidth_alerts(&self) -> Result<BandwidthSummary> {
        self.bandwidth.check().await
    }

    pub async fn run_health_checks(&self) -> Result<HealthSummary> {
        self.health.run().await
    }

    /// Sync, then lifecycle, then bandwidth, then health
    pub async fn run_all(&self) -> Result<FullRunSummary> {
        info!("Running all jobs");
        Ok(FullRunSummary {
            sync: self.sync().await?,
            lifecycle: self.reconcile_lifecycle().await?,
            bandwidth: self.check_bandwidth_alerts().await?,
            health: self.run_health_checks().await?,
        })
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db: DbPool,
    pub engine: Arc<Engine>,
}

impl AppState {
    /// Open the database and wire the engine with the HTTP connector and configured channels
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        let db = db::init_pool(&config.database)
            .await
            .context("Failed to initialize database")?;

        let store: Arc<dyn Store> = Arc::new(SqliteStore::new(db.clone()));
        let connector: Arc<dyn RemoteServerConnector> =
            Arc::new(HttpConnector::new(config.remote.clone()));
        let dispatcher = Arc::new(
            NotificationDispatcher::from_config(store.clone(), &config.notifications)
                .context("Failed to initialize notification channels")?,
        );
        info!(
            operator_channels = config.notifications.operator_channels.len(),
            "Notification dispatcher ready"
        );

        let engine = Arc::new(Engine::new(
            store,
            connector,
            dispatcher,
            config.remote.max_concurrent_servers,
        ));

        Ok(Self { config, db, engine })
    }
}
