use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method};
use serde_json::json;

use super::{Notification, NotificationChannel, SenderError};

/// Posts notifications as JSON to an HTTP endpoint.
pub struct WebhookChannel {
    client: Client,
    url: String,
    method: Method,
    headers: header::HeaderMap,
    timeout: Option<Duration>,
}

impl WebhookChannel {
    pub fn new(
        client: Client,
        url: &str,
        method: &str,
        headers: HashMap<String, String>,
        timeout_secs: Option<u64>,
    ) -> Result<Self, SenderError> {
        let method = match method.to_uppercase().as_str() {
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            other => {
                return Err(SenderError::InvalidConfiguration(format!(
                    "Unsupported HTTP method: {}",
                    other
                )));
            }
        };

        let mut header_map = header::HeaderMap::new();
        for (key, value) in &headers {
            let header_name = header::HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                SenderError::InvalidConfiguration(format!("Invalid header name: {}", e))
            })?;
            let header_value = header::HeaderValue::from_str(value).map_err(|e| {
                SenderError::InvalidConfiguration(format!("Invalid header value: {}", e))
            })?;
            header_map.insert(header_name, header_value);
        }

        Ok(Self {
            client,
            url: url.to_string(),
            method,
            headers: header_map,
            timeout: timeout_secs.map(Duration::from_secs),
        })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> String {
        format!("webhook:{}", self.url)
    }

    async fn send(&self, notification: &Notification) -> Result<(), SenderError> {
        let payload = json!({
            "kind": notification.kind,
            "severity": notification.kind.severity(),
            "title": notification.title,
            "message": notification.body,
            "key_id": notification.key_id,
            "server_id": notification.server_id,
            "sent_at": chrono::Utc::now().to_rfc3339(),
        });

        let mut request = self
            .client
            .request(self.method.clone(), &self.url)
            .headers(self.headers.clone())
            .json(&payload);

        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SenderError::SendFailed(format!(
                "Webhook returned error {}: {}",
                status, body
            )));
        }

        Ok(())
    }
}
