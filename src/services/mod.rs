//! Reconciliation jobs and the clients they drive

pub mod bandwidth;
pub mod health_monitor;
pub mod lifecycle;
pub mod notification;
pub mod remote_server;
pub mod tls;
pub mod usage_sync;

pub use bandwidth::BandwidthAlertMonitor;
pub use health_monitor::HealthMonitor;
pub use lifecycle::LifecycleReconciler;
pub use notification::{NotificationChannel, NotificationDispatcher};
pub use remote_server::{HttpConnector, RemoteServerApi, RemoteServerClient, RemoteServerConnector};
pub use usage_sync::UsageSyncer;
