//! Test application setup utilities
//!
//! Builds the real router over a [`TestEnv`] and drives it with `oneshot`.

use axum::{body::Body, http::Request, Router};
use tower::ServiceExt;

use keyfleet::{api, config::AppConfig, AppState};

use super::fixtures::{memory_database, TestEnv};

/// Test application wrapper for integration testing
pub struct TestApp {
    pub router: Router,
    pub env: TestEnv,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_secret(None).await
    }

    /// Job routes require this bearer secret when set
    pub async fn with_secret(secret: Option<&str>) -> Self {
        let env = TestEnv::new().await;

        let mut config = AppConfig::default();
        config.database = memory_database();
        config.server.cron_secret = secret.map(str::to_string);

        let state = AppState {
            config,
            db: env.store.pool().clone(),
            engine: env.engine.clone(),
        };

        Self {
            router: api::router(state),
            env,
        }
    }

    /// Make a GET request
    pub async fn get(&self, uri: &str) -> TestResponse {
        self.request(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    /// Make an empty POST request
    pub async fn post(&self, uri: &str) -> TestResponse {
        self.request(
            Request::builder()
                .method("POST")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    /// Make an empty POST request with a bearer token
    pub async fn post_with_token(&self, uri: &str, token: &str) -> TestResponse {
        self.request(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("Authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    /// Make an arbitrary request
    pub async fn request(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to execute request");

        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read response body");

        TestResponse { status, body }
    }
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: axum::http::StatusCode,
    pub body: bytes::Bytes,
}

impl TestResponse {
    /// Get the response body as a string
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    /// Parse the response body as JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> T {
        serde_json::from_slice(&self.body).expect("Failed to parse response as JSON")
    }

    /// Assert the response status
    pub fn assert_status(&self, expected: axum::http::StatusCode) -> &Self {
        assert_eq!(
            self.status,
            expected,
            "Expected status {}, got {}. Body: {}",
            expected,
            self.status,
            self.text()
        );
        self
    }

    /// Assert the response status is OK (200)
    pub fn assert_ok(&self) -> &Self {
        self.assert_status(axum::http::StatusCode::OK)
    }

    /// Assert the response status is Unauthorized (401)
    pub fn assert_unauthorized(&self) -> &Self {
        self.assert_status(axum::http::StatusCode::UNAUTHORIZED)
    }
}
