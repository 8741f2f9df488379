//! API routes and handlers
//!
//! This module defines all API endpoints and their routing.

use axum::{middleware::from_fn_with_state, routing::get, Router};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::{middleware::cron_auth_middleware, AppState};

mod health;
mod jobs;

pub use health::*;

/// Public API routes (no authentication required)
pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
}

/// Job trigger routes, guarded by the cron secret when one is configured
pub fn protected_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .nest("/jobs", jobs::routes())
        .layer(from_fn_with_state(state, cron_auth_middleware))
}

/// Full application router under `/api/v1` with request tracing
pub fn router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .nest(
            "/api/v1",
            public_routes().merge(protected_routes(state.clone())),
        )
        .layer(trace_layer)
        .with_state(state)
}
