//! Integration tests for the Redis cluster store.
//!
//! These need a Redis server; set `REDIS_URL` to point at it.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use common::cluster::{quick_config, wait_until_down};
use lock_manager::{
    ClusterLockService, LockError, LockKey, LockManagementService, RedisClusterStore,
};

type RedisService = ClusterLockService<RedisClusterStore>;

/// Helper to get Redis URL from environment or use default.
fn get_redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

/// A namespace no other test run shares.
fn unique_namespace() -> String {
    format!("lock-manager-test:{}", uuid::Uuid::new_v4())
}

async fn join(namespace: &str) -> RedisService {
    let store = RedisClusterStore::builder()
        .url(get_redis_url())
        .namespace(namespace)
        .heartbeat_interval(Duration::from_millis(100))
        .member_ttl(Duration::from_millis(400))
        .build()
        .await
        .unwrap();
    ClusterLockService::new(Arc::new(store), quick_config())
}

#[tokio::test]
#[ignore] // Requires Redis server running
async fn test_write_lock_excludes_other_members() {
    let ns = unique_namespace();
    let a = join(&ns).await;
    let b = join(&ns).await;
    let key = LockKey::named("invoice", "123");

    a.request_write_lock(&key, None, false).await.unwrap();
    let err = b
        .request_write_lock(&key, Some(Duration::from_millis(100)), false)
        .await
        .unwrap_err();
    assert!(matches!(err, LockError::Timeout(_)));

    a.unlock(&key).await.unwrap();
    b.request_write_lock(&key, Some(Duration::from_secs(1)), false)
        .await
        .unwrap();
    assert_eq!(b.lock_state(&key).await.unwrap().writer.as_ref(), Some(b.member()));
    b.unlock(&key).await.unwrap();
    assert!(b.lock_state(&key).await.unwrap().is_free());
}

#[tokio::test]
#[ignore] // Requires Redis server running
async fn test_readers_share_and_block_writer() {
    let ns = unique_namespace();
    let a = join(&ns).await;
    let b = join(&ns).await;
    let c = join(&ns).await;
    let key = LockKey::new("catalog");

    a.request_read_lock(&key, None, false).await.unwrap();
    b.request_read_lock(&key, None, false).await.unwrap();
    let expected: BTreeSet<_> = [a.member().clone(), b.member().clone()].into_iter().collect();
    assert_eq!(c.lock_state(&key).await.unwrap().readers, expected);

    let err = c
        .request_write_lock(&key, Some(Duration::ZERO), false)
        .await
        .unwrap_err();
    assert!(matches!(err, LockError::Timeout(_)));

    a.unlock(&key).await.unwrap();
    b.unlock(&key).await.unwrap();
    c.request_write_lock(&key, Some(Duration::ZERO), false).await.unwrap();
    c.unlock(&key).await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Redis server running
async fn test_conversions() {
    let ns = unique_namespace();
    let a = join(&ns).await;
    let b = join(&ns).await;
    let key = LockKey::named("report", "q3");

    a.request_write_lock(&key, None, false).await.unwrap();
    a.convert_to_read_lock(&key, None).await.unwrap();
    b.request_read_lock(&key, Some(Duration::ZERO), false).await.unwrap();

    let err = a.convert_to_write_lock(&key, None).await.unwrap_err();
    assert!(matches!(err, LockError::ProtocolViolation(_)));

    b.unlock(&key).await.unwrap();
    a.convert_to_write_lock(&key, None).await.unwrap();
    let state = b.lock_state(&key).await.unwrap();
    assert_eq!(state.writer.as_ref(), Some(a.member()));
    assert!(state.readers.is_empty());
    a.unlock(&key).await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Redis server running
async fn test_left_member_locks_are_reclaimed() {
    let ns = unique_namespace();
    let a = join(&ns).await;
    let b = join(&ns).await;
    let key = LockKey::new("inventory");

    a.request_write_lock(&key, None, false).await.unwrap();
    a.store().leave().await.unwrap();
    assert!(wait_until_down(&b, a.member()).await);

    b.request_write_lock(&key, Some(Duration::from_secs(1)), false)
        .await
        .unwrap();

    let err = a.request_read_lock(&key, None, false).await.unwrap_err();
    assert!(matches!(err, LockError::Unavailable(_)));
}

#[tokio::test]
#[ignore] // Requires Redis server running
async fn test_crashed_member_is_swept() {
    let ns = unique_namespace();
    let b = join(&ns).await;
    let key = LockKey::new("inventory");

    let crashed = {
        let a = join(&ns).await;
        a.request_write_lock(&key, None, false).await.unwrap();
        a.member().clone()
        // Dropping the service stops the heartbeat without leaving.
    };

    assert!(wait_until_down(&b, &crashed).await);
    b.request_write_lock(&key, Some(Duration::from_secs(1)), false)
        .await
        .unwrap();
    assert_eq!(b.lock_state(&key).await.unwrap().writer.as_ref(), Some(b.member()));
}
