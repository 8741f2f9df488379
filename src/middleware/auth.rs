//! Shared-secret authentication for job trigger routes

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};

use crate::{utils::AppError, AppState};

/// Require `Authorization: Bearer <cron_secret>` when a secret is configured.
pub async fn cron_auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(secret) = state.config.server.cron_secret.as_deref() else {
        return Ok(next.run(request).await);
    };

    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(extract_bearer_token)
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;

    if !constant_time_eq(token.as_bytes(), secret.as_bytes()) {
        return Err(AppError::Unauthorized("Invalid bearer token".to_string()));
    }

    Ok(next.run(request).await)
}

/// Extract bearer token from Authorization header
fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .or_else(|| auth_header.strip_prefix("bearer "))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
