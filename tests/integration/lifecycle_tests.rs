//! Lifecycle reconciliation integration tests

use chrono::{Duration, Utc};
use keyfleet::models::{ArchiveReason, KeyStatus, NotificationKind};

use crate::common::{expiring_key, hours, new_key, quota_key, TestEnv};

#[tokio::test]
async fn test_expired_key_is_settled_on_the_following_pass() {
    let env = TestEnv::new().await;
    let (server, fake) = env.server("edge-1").await;
    let now = Utc::now();
    fake.set_counter("1", 0);
    let key = env.key(expiring_key(&server, "1", now - hours(1))).await;

    let first = env.engine.reconciler.reconcile_at(now).await.unwrap();
    assert_eq!(first.expired, 1);
    assert_eq!(first.archived, 0);
    assert_eq!(env.reload(&key).await.unwrap().status, KeyStatus::Expired);
    assert!(fake.deleted().is_empty());

    let second = env
        .engine
        .reconciler
        .reconcile_at(now + Duration::minutes(10))
        .await
        .unwrap();
    assert_eq!(second.expired, 0);
    assert_eq!(second.archived, 1);
    assert_eq!(second.remote_deletions_failed, 0);
    assert!(env.reload(&key).await.is_none());
    assert_eq!(fake.deleted(), vec!["1".to_string()]);

    let archived = env
        .store
        .archive()
        .get_by_original_id(&key.id)
        .await
        .unwrap()
        .expect("archive row");
    assert_eq!(archived.archive_reason, ArchiveReason::Expired);
    assert_eq!(archived.remote_key_id, "1");
}

#[tokio::test]
async fn test_expiry_notifies_contact_and_operators() {
    let env = TestEnv::new().await;
    let (server, _fake) = env.server("edge-1").await;
    let now = Utc::now();
    let key = env.key(expiring_key(&server, "1", now - hours(1))).await;

    env.engine.reconciler.reconcile_at(now).await.unwrap();

    assert_eq!(env.operator.titles(), vec!["Access key expired".to_string()]);
    assert_eq!(env.contacts.channel.titles(), vec!["Access key expired".to_string()]);

    let log = env.store.notifications().list_for_key(&key.id).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].kind, NotificationKind::KeyExpired);
    assert_eq!(log[0].delivered_channels, 2);
}

#[tokio::test]
async fn test_exhausted_key_is_depleted_then_archived() {
    let env = TestEnv::new().await;
    let (server, _fake) = env.server("edge-1").await;
    let now = Utc::now();
    let key = env.key(quota_key(&server, "1", 1_000, 1_000)).await;

    let first = env.engine.reconciler.reconcile_at(now).await.unwrap();
    assert_eq!(first.depleted, 1);
    assert_eq!(env.reload(&key).await.unwrap().status, KeyStatus::Depleted);

    let second = env.engine.reconciler.reconcile_at(now + hours(1)).await.unwrap();
    assert_eq!(second.archived, 1);
    let archived = env
        .store
        .archive()
        .get_by_original_id(&key.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(archived.archive_reason, ArchiveReason::Depleted);
    assert_eq!(archived.used_bytes, 1_000);
}

#[tokio::test]
async fn test_remote_delete_failure_still_archives() {
    let env = TestEnv::new().await;
    let (server, fake) = env.server("edge-1").await;
    let now = Utc::now();
    fake.set_fail_delete(true);
    let key = env.key(expiring_key(&server, "1", now - hours(2))).await;

    env.engine.reconciler.reconcile_at(now).await.unwrap();
    let summary = env.engine.reconciler.reconcile_at(now + hours(1)).await.unwrap();

    assert_eq!(summary.archived, 1);
    assert_eq!(summary.remote_deletions_failed, 1);
    assert!(summary.errors.is_empty());
    assert!(env.reload(&key).await.is_none());
}

#[tokio::test]
async fn test_inactive_server_keys_wait_for_reactivation() {
    let env = TestEnv::new().await;
    let (server, fake) = env.server("edge-1").await;
    let now = Utc::now();
    let settled = env.key(expiring_key(&server, "1", now - hours(2))).await;
    env.engine.reconciler.reconcile_at(now).await.unwrap();

    let due = env.key(expiring_key(&server, "2", now - hours(1))).await;
    let exhausted = env.key(quota_key(&server, "3", 100, 100)).await;
    env.store.servers().set_active(&server.id, false).await.unwrap();

    let paused = env.engine.reconciler.reconcile_at(now + hours(1)).await.unwrap();
    assert_eq!(paused.expired, 0);
    assert_eq!(paused.depleted, 0);
    assert_eq!(paused.archived, 0);
    assert!(fake.deleted().is_empty());
    assert_eq!(env.reload(&settled).await.unwrap().status, KeyStatus::Expired);
    assert_eq!(env.reload(&due).await.unwrap().status, KeyStatus::Active);
    assert_eq!(env.reload(&exhausted).await.unwrap().status, KeyStatus::Active);

    env.store.servers().set_active(&server.id, true).await.unwrap();
    let resumed = env.engine.reconciler.reconcile_at(now + hours(2)).await.unwrap();
    assert_eq!(resumed.expired, 1);
    assert_eq!(resumed.depleted, 1);
    assert_eq!(resumed.archived, 1);
    assert_eq!(fake.deleted(), vec!["1".to_string()]);
    assert!(env.reload(&settled).await.is_none());
}

#[tokio::test]
async fn test_expiration_warning_sent_once_per_expiry() {
    let env = TestEnv::new().await;
    let (server, _fake) = env.server("edge-1").await;
    let now = Utc::now();
    let key = env.key(expiring_key(&server, "1", now + hours(48))).await;
    let far = env.key(expiring_key(&server, "2", now + hours(24 * 10))).await;

    let first = env.engine.reconciler.reconcile_at(now).await.unwrap();
    assert_eq!(first.warnings_sent, 1);
    assert_eq!(first.expired, 0);

    let second = env.engine.reconciler.reconcile_at(now + hours(6)).await.unwrap();
    assert_eq!(second.warnings_sent, 0);

    assert!(env.reload(&key).await.unwrap().last_warning_at.is_some());
    assert!(env.reload(&far).await.unwrap().last_warning_at.is_none());
    assert_eq!(
        env.operator.titles(),
        vec!["Access key expiring soon".to_string()]
    );
}

#[tokio::test]
async fn test_live_keys_without_expiry_or_quota_are_untouched() {
    let env = TestEnv::new().await;
    let (server, _fake) = env.server("edge-1").await;
    let key = env.key(new_key(&server, "1")).await;

    let summary = env.engine.reconciler.reconcile_at(Utc::now()).await.unwrap();
    assert_eq!(summary.expired + summary.depleted + summary.archived, 0);
    assert_eq!(env.reload(&key).await.unwrap().status, KeyStatus::Active);
    assert!(env.operator.sent().is_empty());
}
