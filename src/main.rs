//! Keyfleet - reconciliation engine for leased VPN access keys
//!
//! Serves health probes and the job trigger endpoints that an external
//! scheduler calls on its own cadence.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;

use keyfleet::{api, utils::init_logging, AppConfig, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        print_help();
        return Ok(());
    }

    if args.iter().any(|arg| arg == "--version" || arg == "-V") {
        println!("keyfleet {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Load configuration first (before logging, so we know log format)
    let config = match config_arg(&args) {
        Some(path) => {
            let _ = dotenvy::dotenv();
            AppConfig::load_from(Some(path))
        }
        None => AppConfig::load(),
    }
    .context("Failed to load configuration")?;

    // The guard must be kept alive so buffered file output is flushed
    let _log_guard = init_logging(&config.logging);

    info!("keyfleet {} starting up", env!("CARGO_PKG_VERSION"));

    ensure_data_directory(&config)?;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address configuration")?;
    if config.server.cron_secret.is_none() {
        info!("No cron secret configured, job routes are unauthenticated");
    }

    let state = AppState::from_config(config).await?;
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Shut down cleanly");
    Ok(())
}

fn config_arg(args: &[String]) -> Option<PathBuf> {
    args.iter()
        .position(|arg| arg == "--config" || arg == "-c")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Ensure the data directory exists
fn ensure_data_directory(config: &AppConfig) -> Result<()> {
    if let Some(path) = config.database.url.strip_prefix("sqlite://") {
        let path = path.split('?').next().unwrap_or(path);
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create data directory")?;
                info!("Created data directory: {:?}", parent);
            }
        }
    }
    Ok(())
}

fn print_help() {
    println!(
        r#"keyfleet {}

USAGE:
    keyfleet [OPTIONS]

OPTIONS:
    -h, --help              Print this help message
    -V, --version           Print version information
    -c, --config <PATH>     Configuration file to load

ENVIRONMENT:
    KEYFLEET_CONFIG         Path to configuration file (default: config.yaml)
    KEYFLEET_CRON_SECRET    Bearer secret required by the job routes

ROUTES:
    GET  /api/v1/health, /api/v1/health/live, /api/v1/health/ready
    POST /api/v1/jobs/sync|lifecycle|bandwidth|health|all"#,
        env!("CARGO_PKG_VERSION")
    );
}
