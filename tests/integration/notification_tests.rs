//! Notification channel and dispatcher tests

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use keyfleet::db::Store;
use keyfleet::models::{DeliveryOutcome, NotificationKind};
use keyfleet::services::notification::{
    Notification, NotificationChannel, NotificationDispatcher, SenderError, TelegramChannel,
    WebhookChannel,
};

use crate::common::{memory_store, new_key, RecordingChannel, RecordingContacts, TestEnv};

fn server_down() -> Notification {
    Notification {
        kind: NotificationKind::ServerDown,
        title: "Server down".to_string(),
        body: "Server \"edge-1\" is unreachable: timeout".to_string(),
        key_id: None,
        server_id: Some("s1".to_string()),
    }
}

#[tokio::test]
async fn test_telegram_posts_html_message() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bot123:abc/sendMessage"))
        .and(body_partial_json(json!({
            "chat_id": "-100200",
            "parse_mode": "HTML",
            "text": "<b>Server down</b>\nServer \"edge-1\" is unreachable: timeout"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&mock)
        .await;

    let channel =
        TelegramChannel::new(reqwest::Client::new(), "123:abc", "-100200").with_api_base(&mock.uri());
    channel.send(&server_down()).await.unwrap();
}

#[tokio::test]
async fn test_telegram_error_status_is_send_failure() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403).set_body_string("bot was blocked"))
        .mount(&mock)
        .await;

    let channel =
        TelegramChannel::new(reqwest::Client::new(), "t", "1").with_api_base(&mock.uri());
    let err = channel.send(&server_down()).await.unwrap_err();
    assert!(matches!(err, SenderError::SendFailed(_)));
}

#[tokio::test]
async fn test_telegram_network_error_hides_bot_token() {
    let channel = TelegramChannel::new(reqwest::Client::new(), "123:very-secret-token", "1")
        .with_api_base("http://127.0.0.1:1");

    let err = channel.send(&server_down()).await.unwrap_err();
    assert!(matches!(err, SenderError::NetworkError(_)));
    assert!(!err.to_string().contains("very-secret-token"));
    assert!(!format!("{:?}", err).contains("very-secret-token"));
}

#[tokio::test]
async fn test_webhook_posts_json_with_headers() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/ops"))
        .and(header("x-api-token", "s3cret"))
        .and(body_partial_json(json!({
            "kind": "server_down",
            "severity": "critical",
            "title": "Server down",
            "server_id": "s1"
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock)
        .await;

    let mut headers = HashMap::new();
    headers.insert("X-Api-Token".to_string(), "s3cret".to_string());
    let channel = WebhookChannel::new(
        reqwest::Client::new(),
        &format!("{}/hooks/ops", mock.uri()),
        "post",
        headers,
        Some(5),
    )
    .unwrap();

    channel.send(&server_down()).await.unwrap();
}

#[tokio::test]
async fn test_dispatcher_logs_every_attempt() {
    let store = memory_store().await;
    let shared: Arc<dyn Store> = Arc::new(store.clone());
    let healthy = RecordingChannel::new("healthy");
    let broken = RecordingChannel::new("broken");
    broken.set_fail(true);

    let dispatcher = NotificationDispatcher::new(
        shared,
        vec![
            Arc::new(healthy.clone()) as Arc<dyn NotificationChannel>,
            Arc::new(broken.clone()),
        ],
        Arc::new(RecordingContacts::new()),
    );

    let outcome = dispatcher.notify_operators(&server_down(), true).await;
    assert_eq!(outcome, DeliveryOutcome::Partial);
    assert_eq!(healthy.sent().len(), 1);

    healthy.set_fail(true);
    let outcome = dispatcher.notify_operators(&server_down(), true).await;
    assert_eq!(outcome, DeliveryOutcome::Failed);

    let log = store.notifications().list(10).await.unwrap();
    assert_eq!(log.len(), 2);
    assert!(log.iter().all(|r| r.kind == NotificationKind::ServerDown));
    assert!(log.iter().all(|r| r.server_id.as_deref() == Some("s1")));
}

#[tokio::test]
async fn test_key_notifications_reach_contact_first() {
    let env = TestEnv::new().await;
    let (server, _fake) = env.server("edge-1").await;
    let key = env.key(new_key(&server, "1")).await;

    let dispatcher = NotificationDispatcher::new(
        Arc::new(env.store.clone()),
        vec![Arc::new(env.operator.clone()) as Arc<dyn NotificationChannel>],
        Arc::new(env.contacts.clone()),
    );
    let outcome = dispatcher
        .notify_key(&key, &Notification::key_expired(&key), true)
        .await;

    assert_eq!(outcome, DeliveryOutcome::Sent);
    assert_eq!(env.contacts.channel.titles(), vec!["Access key expired".to_string()]);
    assert_eq!(env.operator.titles(), vec!["Access key expired".to_string()]);
}

#[tokio::test]
async fn test_disabled_delivery_is_logged_as_skipped() {
    let env = TestEnv::new().await;

    let dispatcher = NotificationDispatcher::new(
        Arc::new(env.store.clone()),
        vec![Arc::new(env.operator.clone()) as Arc<dyn NotificationChannel>],
        Arc::new(env.contacts.clone()),
    );
    let outcome = dispatcher.notify_operators(&server_down(), false).await;

    assert_eq!(outcome, DeliveryOutcome::Skipped);
    assert!(env.operator.sent().is_empty());
    let log = env.store.notifications().list(10).await.unwrap();
    assert_eq!(log[0].outcome, DeliveryOutcome::Skipped);
}
