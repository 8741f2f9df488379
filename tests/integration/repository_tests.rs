//! Store and repository integration tests

use chrono::{Duration, Utc};
use keyfleet::db::Store;
use keyfleet::models::{settings, ArchiveReason, BandwidthThreshold, KeyStatus, NewAccessKey};

use crate::common::{hours, new_key, quota_key, TestEnv};

#[tokio::test]
async fn test_archive_rejects_live_key_and_rolls_back() {
    let env = TestEnv::new().await;
    let (server, _fake) = env.server("edge-1").await;
    let key = env.key(new_key(&server, "1")).await;

    let result = env
        .store
        .archive_key(&key, ArchiveReason::Expired, Utc::now())
        .await;
    assert!(result.is_err());

    assert!(env.reload(&key).await.is_some());
    assert!(env
        .store
        .archive()
        .get_by_original_id(&key.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_archive_moves_settled_key() {
    let env = TestEnv::new().await;
    let (server, _fake) = env.server("edge-1").await;
    let now = Utc::now();
    let key = env
        .key(NewAccessKey {
            status: Some(KeyStatus::Depleted),
            ..quota_key(&server, "1", 100, 100)
        })
        .await;

    let archived = env
        .store
        .archive_key(&key, ArchiveReason::Depleted, now)
        .await
        .unwrap();
    assert_eq!(archived.original_key_id, key.id);
    assert!(archived.retention_until > now + Duration::days(80));
    assert!(env.reload(&key).await.is_none());
}

#[tokio::test]
async fn test_record_usage_for_missing_key_writes_nothing() {
    let env = TestEnv::new().await;

    let result = env.store.record_usage("missing", 10, Utc::now()).await;
    assert!(result.is_err());
    assert!(env.store.latest_snapshot("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_bandwidth_flags_are_one_shot() {
    let env = TestEnv::new().await;
    let (server, _fake) = env.server("edge-1").await;
    let key = env.key(quota_key(&server, "1", 100, 85)).await;
    let now = Utc::now();

    assert!(env
        .store
        .set_bandwidth_flag(&key.id, BandwidthThreshold::Warning, now)
        .await
        .unwrap());
    assert!(!env
        .store
        .set_bandwidth_flag(&key.id, BandwidthThreshold::Warning, now)
        .await
        .unwrap());

    assert!(env.store.keys().clear_bandwidth_flags(&key.id).await.unwrap());
    assert!(!env.reload(&key).await.unwrap().alert_80_sent);
}

#[tokio::test]
async fn test_critical_flag_implies_warning_flag() {
    let env = TestEnv::new().await;
    let (server, _fake) = env.server("edge-1").await;
    let key = env.key(quota_key(&server, "1", 100, 95)).await;
    let now = Utc::now();

    assert!(env
        .store
        .set_bandwidth_flag(&key.id, BandwidthThreshold::Critical, now)
        .await
        .unwrap());
    assert!(!env
        .store
        .set_bandwidth_flag(&key.id, BandwidthThreshold::Warning, now)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_transition_status_is_conditional() {
    let env = TestEnv::new().await;
    let (server, _fake) = env.server("edge-1").await;
    let key = env.key(new_key(&server, "1")).await;
    let now = Utc::now();

    assert!(env
        .store
        .transition_status(&key.id, &[KeyStatus::Active], KeyStatus::Depleted, now, Some(now))
        .await
        .unwrap());
    assert!(!env
        .store
        .transition_status(&key.id, &[KeyStatus::Active], KeyStatus::Depleted, now, Some(now))
        .await
        .unwrap());

    let reloaded = env.reload(&key).await.unwrap();
    assert_eq!(reloaded.status, KeyStatus::Depleted);
    assert!(reloaded.disabled_at.is_some());
}

#[tokio::test]
async fn test_expiration_warning_respects_window() {
    let env = TestEnv::new().await;
    let (server, _fake) = env.server("edge-1").await;
    let key = env.key(new_key(&server, "1")).await;
    let now = Utc::now();
    let window_start = now - hours(24);

    assert!(env
        .store
        .mark_expiration_warning(&key.id, now, window_start)
        .await
        .unwrap());
    assert!(!env
        .store
        .mark_expiration_warning(&key.id, now + hours(1), window_start)
        .await
        .unwrap());
    assert!(env
        .store
        .mark_expiration_warning(&key.id, now + hours(48), now + hours(2))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_expire_due_skips_future_and_settled_keys() {
    let env = TestEnv::new().await;
    let (server, _fake) = env.server("edge-1").await;
    let now = Utc::now();
    let due = env
        .key(NewAccessKey {
            expires_at: Some(now - hours(1)),
            status: Some(KeyStatus::Pending),
            ..new_key(&server, "1")
        })
        .await;
    env.key(NewAccessKey {
        expires_at: Some(now + hours(1)),
        ..new_key(&server, "2")
    })
    .await;
    env.key(NewAccessKey {
        expires_at: Some(now - hours(1)),
        status: Some(KeyStatus::Depleted),
        ..new_key(&server, "3")
    })
    .await;

    let expired = env.store.expire_due_keys(now).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id, due.id);
    assert_eq!(expired[0].status, KeyStatus::Expired);
}

#[tokio::test]
async fn test_sessions_close_with_reason() {
    let env = TestEnv::new().await;
    let (server, _fake) = env.server("edge-1").await;
    let key = env.key(new_key(&server, "1")).await;
    let now = Utc::now();

    env.store.sessions().open(&key.id, now).await.unwrap();
    env.store.sessions().open(&key.id, now).await.unwrap();
    assert_eq!(env.store.sessions().count_active(&key.id).await.unwrap(), 2);

    let closed = env
        .store
        .close_active_sessions(&key.id, now, "quota_exceeded")
        .await
        .unwrap();
    assert_eq!(closed, 2);
    assert_eq!(env.store.sessions().count_active(&key.id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_settings_round_trip() {
    let env = TestEnv::new().await;

    env.store
        .settings()
        .set_setting(settings::WARNING_PERIOD_DAYS, "7", Some("Days of notice"))
        .await
        .unwrap();
    env.store
        .settings()
        .set_setting(settings::NOTIFICATIONS_ENABLED, "false", None)
        .await
        .unwrap();

    let stored = env
        .store
        .settings()
        .get_setting(settings::WARNING_PERIOD_DAYS)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.value, "7");

    let loaded = env.store.load_settings().await.unwrap();
    assert_eq!(loaded.warning_period_days, 7);
    assert!(!loaded.notifications_enabled);
}
