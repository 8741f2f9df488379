//! Health monitor integration tests

use chrono::{Duration, Utc};
use keyfleet::models::{HealthStatus, JobScope};

use crate::common::{new_key, TestEnv};

#[tokio::test]
async fn test_first_run_creates_record_and_probes() {
    let env = TestEnv::new().await;
    let (server, fake) = env.server("edge-1").await;
    fake.set_latency_ms(40);

    let summary = env.engine.health.run_at(Utc::now()).await.unwrap();
    assert_eq!(summary.records_created, 1);
    assert_eq!(summary.servers_checked, 1);
    assert_eq!(summary.up, 1);
    assert_eq!(summary.alerts_sent, 0);

    let record = env.store.health().get(&server.id).await.unwrap().unwrap();
    assert_eq!(record.last_status, HealthStatus::Up);
    assert_eq!(record.last_latency_ms, Some(40));
    assert_eq!(record.total_checks, 1);
    assert!(env.operator.sent().is_empty());
}

#[tokio::test]
async fn test_outage_and_recovery_alert_on_edges_only() {
    let env = TestEnv::new().await;
    let (server, fake) = env.server("edge-1").await;
    let t0 = Utc::now();

    fake.set_unreachable(true);
    let down = env.engine.health.run_at(t0).await.unwrap();
    assert_eq!(down.down, 1);
    assert_eq!(down.alerts_sent, 1);

    let still_down = env
        .engine
        .health
        .run_at(t0 + Duration::minutes(10))
        .await
        .unwrap();
    assert_eq!(still_down.down, 1);
    assert_eq!(still_down.alerts_sent, 0);

    fake.set_unreachable(false);
    let up = env
        .engine
        .health
        .run_at(t0 + Duration::minutes(20))
        .await
        .unwrap();
    assert_eq!(up.up, 1);
    assert_eq!(up.alerts_sent, 1);

    assert_eq!(
        env.operator.titles(),
        vec!["Server down".to_string(), "Server recovered".to_string()]
    );

    let record = env.store.health().get(&server.id).await.unwrap().unwrap();
    assert_eq!(record.total_checks, 3);
    assert_eq!(record.failed_checks, 2);
    assert_eq!(record.uptime_percent, 33.33);
    assert!(record.last_error.is_none());
    assert_eq!(record.last_notified_at, Some(t0 + Duration::minutes(20)));
}

#[tokio::test]
async fn test_down_probe_records_error_without_latency() {
    let env = TestEnv::new().await;
    let (server, fake) = env.server("edge-1").await;
    fake.set_unreachable(true);

    env.engine.health.run_at(Utc::now()).await.unwrap();

    let record = env.store.health().get(&server.id).await.unwrap().unwrap();
    assert_eq!(record.last_status, HealthStatus::Down);
    assert!(record.last_latency_ms.is_none());
    assert!(record.last_error.is_some());
}

#[tokio::test]
async fn test_slow_server_does_not_alert() {
    let env = TestEnv::new().await;
    let (server, fake) = env.server("edge-1").await;
    fake.set_latency_ms(800);

    let summary = env.engine.health.run_at(Utc::now()).await.unwrap();
    assert_eq!(summary.slow, 1);
    assert_eq!(summary.alerts_sent, 0);
    assert!(env.operator.sent().is_empty());

    let record = env.store.health().get(&server.id).await.unwrap().unwrap();
    assert_eq!(record.last_status, HealthStatus::Slow);
    assert_eq!(record.successful_checks, 1);
}

#[tokio::test]
async fn test_server_not_due_is_skipped() {
    let env = TestEnv::new().await;
    let (server, _fake) = env.server("edge-1").await;
    let t0 = Utc::now();

    env.engine.health.run_at(t0).await.unwrap();
    let summary = env
        .engine
        .health
        .run_at(t0 + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(summary.servers_checked, 0);
    assert_eq!(summary.skipped, 1);

    let record = env.store.health().get(&server.id).await.unwrap().unwrap();
    assert_eq!(record.total_checks, 1);
}

#[tokio::test]
async fn test_disabled_checks_are_skipped() {
    let env = TestEnv::new().await;
    let (server, fake) = env.server("edge-1").await;
    let t0 = Utc::now();

    env.engine.health.run_at(t0).await.unwrap();
    assert!(env
        .store
        .health()
        .set_checks_enabled(&server.id, false)
        .await
        .unwrap());

    fake.set_unreachable(true);
    let summary = env
        .engine
        .health
        .run_at(t0 + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(summary.servers_checked, 0);
    assert_eq!(summary.skipped, 1);
    assert!(env.operator.sent().is_empty());
}

#[tokio::test]
async fn test_outage_alerts_skip_key_contacts() {
    let env = TestEnv::new().await;
    let (server, fake) = env.server("edge-1").await;
    env.key(new_key(&server, "1")).await;
    fake.set_unreachable(true);

    env.engine.health.run_at(Utc::now()).await.unwrap();

    assert_eq!(env.operator.sent().len(), 1);
    assert!(env.contacts.channel.sent().is_empty());
}

#[tokio::test]
async fn test_servers_are_probed_independently() {
    let env = TestEnv::new().await;
    let (_up, _up_fake) = env.server("edge-up").await;
    let (down, down_fake) = env.server("edge-down").await;
    down_fake.set_unreachable(true);

    let summary = env.engine.health.run_at(Utc::now()).await.unwrap();
    assert_eq!(summary.servers_checked, 2);
    assert_eq!(summary.up, 1);
    assert_eq!(summary.down, 1);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].scope, JobScope::Server);
    assert_eq!(summary.errors[0].server_id.as_deref(), Some(down.id.as_str()));
    assert!(summary.errors[0].message.starts_with("probe: "));
}

#[tokio::test]
async fn test_early_trigger_at_interval_cadence_still_probes() {
    let env = TestEnv::new().await;
    let (server, _fake) = env.server("edge-1").await;
    let t0 = Utc::now();

    let mut checked = Vec::new();
    for run in [
        t0,
        t0 + Duration::minutes(5) - Duration::milliseconds(50),
        t0 + Duration::minutes(10) - Duration::milliseconds(100),
    ] {
        checked.push(env.engine.health.run_at(run).await.unwrap().servers_checked);
    }
    assert_eq!(checked, vec![1, 1, 1]);

    let record = env.store.health().get(&server.id).await.unwrap().unwrap();
    assert_eq!(record.total_checks, 3);
}
