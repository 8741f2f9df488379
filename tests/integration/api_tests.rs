//! HTTP surface tests

use serde_json::Value;

use crate::common::{new_key, TestApp};

#[tokio::test]
async fn test_health_endpoint() {
    let app = TestApp::new().await;

    let response = app.get("/api/v1/health").await;
    response.assert_ok();

    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"]["status"], "healthy");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_liveness_and_readiness() {
    let app = TestApp::new().await;

    app.get("/api/v1/health/live").await.assert_ok();
    app.get("/api/v1/health/ready").await.assert_ok();
}

#[tokio::test]
async fn test_sync_job_returns_summary() {
    let app = TestApp::new().await;
    let (server, fake) = app.env.server("edge-1").await;
    app.env.key(new_key(&server, "1")).await;
    fake.set_counter("1", 2048);

    let response = app.post("/api/v1/jobs/sync").await;
    response.assert_ok();

    let body: Value = response.json();
    assert_eq!(body["servers_total"], 1);
    assert_eq!(body["servers_synced"], 1);
    assert_eq!(body["keys_updated"], 1);
}

#[tokio::test]
async fn test_run_all_returns_every_summary() {
    let app = TestApp::new().await;
    app.env.server("edge-1").await;

    let response = app.post("/api/v1/jobs/all").await;
    response.assert_ok();

    let body: Value = response.json();
    for section in ["sync", "lifecycle", "bandwidth", "health"] {
        assert!(body[section].is_object(), "missing {} summary", section);
    }
    assert_eq!(body["health"]["servers_checked"], 1);
}

#[tokio::test]
async fn test_individual_job_routes() {
    let app = TestApp::new().await;

    for job in ["lifecycle", "bandwidth", "health"] {
        app.post(&format!("/api/v1/jobs/{}", job)).await.assert_ok();
    }
}

#[tokio::test]
async fn test_job_routes_require_secret_when_configured() {
    let app = TestApp::with_secret(Some("s3cret")).await;

    app.post("/api/v1/jobs/sync").await.assert_unauthorized();
    app.post_with_token("/api/v1/jobs/sync", "wrong")
        .await
        .assert_unauthorized();
    app.post_with_token("/api/v1/jobs/sync", "s3cret")
        .await
        .assert_ok();
}

#[tokio::test]
async fn test_health_routes_stay_public_with_secret() {
    let app = TestApp::with_secret(Some("s3cret")).await;

    app.get("/api/v1/health").await.assert_ok();
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let app = TestApp::new().await;

    app.get("/api/v1/nope")
        .await
        .assert_status(axum::http::StatusCode::NOT_FOUND);
}
