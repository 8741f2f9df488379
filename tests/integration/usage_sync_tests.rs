//! Usage sync integration tests

use chrono::Utc;
use keyfleet::models::{JobScope, KeyStatus, NewAccessKey};

use crate::common::{hours, new_key, TestEnv};

#[tokio::test]
async fn test_sync_mirrors_absolute_counter_and_records_deltas() {
    let env = TestEnv::new().await;
    let (server, fake) = env.server("edge-1").await;
    let key = env.key(new_key(&server, "1")).await;
    let t0 = Utc::now();

    fake.set_counter("1", 500);
    let summary = env.engine.syncer.sync_at(t0).await.unwrap();
    assert_eq!(summary.servers_total, 1);
    assert_eq!(summary.servers_synced, 1);
    assert_eq!(summary.keys_updated, 1);
    assert!(summary.per_server_errors.is_empty());

    fake.set_counter("1", 700);
    env.engine.syncer.sync_at(t0 + hours(1)).await.unwrap();

    let reloaded = env.reload(&key).await.unwrap();
    assert_eq!(reloaded.used_bytes, 700);

    let snapshots = env.store.usage().list_for_key(&key.id).await.unwrap();
    let deltas: Vec<u64> = snapshots.iter().map(|s| s.delta).collect();
    assert_eq!(deltas, vec![500, 200]);
}

#[tokio::test]
async fn test_counter_reset_counts_new_reading_as_delta() {
    let env = TestEnv::new().await;
    let (server, fake) = env.server("edge-1").await;
    let key = env.key(new_key(&server, "1")).await;
    let t0 = Utc::now();

    fake.set_counter("1", 500);
    env.engine.syncer.sync_at(t0).await.unwrap();
    fake.set_counter("1", 200);
    env.engine.syncer.sync_at(t0 + hours(1)).await.unwrap();

    let latest = env.store.usage().latest(&key.id).await.unwrap().unwrap();
    assert_eq!(latest.value, 200);
    assert_eq!(latest.delta, 200);
    assert_eq!(env.reload(&key).await.unwrap().used_bytes, 200);
}

#[tokio::test]
async fn test_repeated_pass_does_not_double_count() {
    let env = TestEnv::new().await;
    let (server, fake) = env.server("edge-1").await;
    let key = env.key(new_key(&server, "1")).await;
    let t0 = Utc::now();

    fake.set_counter("1", 1_000);
    env.engine.syncer.sync_at(t0).await.unwrap();
    env.engine.syncer.sync_at(t0 + hours(1)).await.unwrap();

    assert_eq!(env.reload(&key).await.unwrap().used_bytes, 1_000);
    let snapshots = env.store.usage().list_for_key(&key.id).await.unwrap();
    let total: u64 = snapshots.iter().map(|s| s.delta).sum();
    assert_eq!(total, 1_000);
}

#[tokio::test]
async fn test_failing_server_is_isolated() {
    let env = TestEnv::new().await;
    let (good, good_fake) = env.server("edge-good").await;
    let (bad, bad_fake) = env.server("edge-bad").await;
    let good_key = env.key(new_key(&good, "1")).await;
    let bad_key = env.key(new_key(&bad, "1")).await;

    good_fake.set_counter("1", 42);
    bad_fake.set_counter("1", 99);
    bad_fake.set_fail_metrics(true);

    let summary = env.engine.syncer.sync_at(Utc::now()).await.unwrap();
    assert_eq!(summary.servers_total, 2);
    assert_eq!(summary.servers_synced, 1);
    assert_eq!(summary.keys_updated, 1);
    assert_eq!(summary.per_server_errors.len(), 1);
    assert_eq!(summary.per_server_errors[0].scope, JobScope::Server);
    assert_eq!(summary.per_server_errors[0].server_id.as_deref(), Some(bad.id.as_str()));

    assert_eq!(env.reload(&good_key).await.unwrap().used_bytes, 42);
    assert_eq!(env.reload(&bad_key).await.unwrap().used_bytes, 0);
}

#[tokio::test]
async fn test_only_live_keys_present_in_metrics_are_updated() {
    let env = TestEnv::new().await;
    let (server, fake) = env.server("edge-1").await;
    let live = env.key(new_key(&server, "1")).await;
    let unreported = env.key(new_key(&server, "2")).await;
    let expired = env
        .key(NewAccessKey {
            status: Some(KeyStatus::Expired),
            ..new_key(&server, "3")
        })
        .await;

    fake.set_counter("1", 10);
    fake.set_counter("3", 30);

    let summary = env.engine.syncer.sync_at(Utc::now()).await.unwrap();
    assert_eq!(summary.keys_updated, 1);
    assert_eq!(env.reload(&live).await.unwrap().used_bytes, 10);
    assert_eq!(env.reload(&unreported).await.unwrap().used_bytes, 0);
    assert_eq!(env.reload(&expired).await.unwrap().used_bytes, 0);
}

#[tokio::test]
async fn test_inactive_servers_are_not_contacted() {
    let env = TestEnv::new().await;
    let (server, fake) = env.server("edge-1").await;
    env.store.servers().set_active(&server.id, false).await.unwrap();

    let summary = env.engine.syncer.sync_at(Utc::now()).await.unwrap();
    assert_eq!(summary.servers_total, 0);
    assert_eq!(fake.metrics_calls(), 0);
}

#[tokio::test]
async fn test_concurrent_servers_sync_on_shared_file_database() {
    let dir = tempfile::tempdir().unwrap();
    let env = TestEnv::file_backed(dir.path(), 10, 8).await;

    let mut keys = Vec::new();
    for s in 0..16 {
        let (server, fake) = env.server(&format!("edge-{}", s)).await;
        for k in 0..10 {
            let remote_id = k.to_string();
            keys.push(env.key(new_key(&server, &remote_id)).await);
            fake.set_counter(&remote_id, 1_000 + k);
        }
    }

    let t0 = Utc::now();
    for pass in 0..3 {
        let summary = env.engine.syncer.sync_at(t0 + hours(pass)).await.unwrap();
        assert!(summary.per_server_errors.is_empty(), "{:?}", summary.per_server_errors);
        assert_eq!(summary.servers_synced, 16);
        assert_eq!(summary.keys_updated, 160);
    }

    for key in &keys {
        let snapshots = env.store.usage().list_for_key(&key.id).await.unwrap();
        assert_eq!(snapshots.len(), 3);
        let total: u64 = snapshots.iter().map(|s| s.delta).sum();
        assert_eq!(total, env.reload(key).await.unwrap().used_bytes);
    }
}

#[tokio::test]
async fn test_duplicate_concurrent_passes_count_span_once() {
    let dir = tempfile::tempdir().unwrap();
    let env = TestEnv::file_backed(dir.path(), 4, 4).await;
    let (server, fake) = env.server("edge-1").await;
    let key = env.key(new_key(&server, "1")).await;
    let t0 = Utc::now();

    fake.set_counter("1", 400);
    env.engine.syncer.sync_at(t0).await.unwrap();

    fake.set_counter("1", 1_000);
    let later = t0 + hours(1);
    let (a, b) = tokio::join!(
        env.engine.syncer.sync_at(later),
        env.engine.syncer.sync_at(later)
    );
    assert!(a.unwrap().per_server_errors.is_empty());
    assert!(b.unwrap().per_server_errors.is_empty());

    assert_eq!(env.reload(&key).await.unwrap().used_bytes, 1_000);
    let snapshots = env.store.usage().list_for_key(&key.id).await.unwrap();
    let total: u64 = snapshots.iter().map(|s| s.delta).sum();
    assert_eq!(total, 1_000);
}
