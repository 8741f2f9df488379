//! Job trigger endpoints
//!
//! Each route runs one pass synchronously and returns its summary. Setup
//! failures (unreadable settings, store down) map to a 500.

use axum::{extract::State, routing::post, Json, Router};
use tracing::info;

use crate::{
    models::{BandwidthSummary, FullRunSummary, HealthSummary, LifecycleSummary, SyncSummary},
    utils::AppResult,
    AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sync", post(run_sync))
        .route("/lifecycle", post(run_lifecycle))
        .route("/bandwidth", post(run_bandwidth))
        .route("/health", post(run_health))
        .route("/all", post(run_all))
}

async fn run_sync(State(state): State<AppState>) -> AppResult<Json<SyncSummary>> {
    info!(job = "sync", "Job triggered");
    Ok(Json(state.engine.sync().await?))
}

async fn run_lifecycle(State(state): State<AppState>) -> AppResult<Json<LifecycleSummary>> {
    info!(job = "lifecycle", "Job triggered");
    Ok(Json(state.engine.reconcile_lifecycle().await?))
}

async fn run_bandwidth(State(state): State<AppState>) -> AppResult<Json<BandwidthSummary>> {
    info!(job = "bandwidth", "Job triggered");
    Ok(Json(state.engine.check_bandwidth_alerts().await?))
}

async fn run_health(State(state): State<AppState>) -> AppResult<Json<HealthSummary>> {
    info!(job = "health", "Job triggered");
    Ok(Json(state.engine.run_health_checks().await?))
}

async fn run_all(State(state): State<AppState>) -> AppResult<Json<FullRunSummary>> {
    info!(job = "all", "Job triggered");
    Ok(Json(state.engine.run_all().await?))
}
