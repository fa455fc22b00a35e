//! Helpers for building members of an in-memory cluster.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use lock_manager::{
    AccessKind, ClusterLockConfig, ClusterLockService, ClusterStore, LockResult, MemberId,
    MembershipEvent, MemoryCluster, MemoryClusterStore, ReadLockRecord, WriteLockRecord,
};
use tokio::sync::broadcast;

pub type MemoryService = ClusterLockService<MemoryClusterStore>;

/// Config with short waits so refusals do not slow the suite down.
pub fn quick_config() -> ClusterLockConfig {
    ClusterLockConfig::builder()
        .default_read_timeout(Duration::from_millis(200))
        .default_write_timeout(Duration::from_millis(200))
        .unlock_timeout(Duration::from_millis(200))
        .build()
        .expect("valid config")
}

/// Joins `cluster` as `name` with [`quick_config`].
pub fn member(cluster: &MemoryCluster, name: &str) -> MemoryService {
    member_with(cluster, name, quick_config())
}

pub fn member_with(cluster: &MemoryCluster, name: &str, config: ClusterLockConfig) -> MemoryService {
    ClusterLockService::new(Arc::new(cluster.join_as(name)), config)
}

/// Polls until `observer` has marked `member` down, for at most two seconds.
pub async fn wait_until_down<S: ClusterStore>(observer: &ClusterLockService<S>, member: &MemberId) -> bool {
    for _ in 0..200 {
        if observer
            .store()
            .down_members()
            .await
            .map(|down| down.contains(member))
            .unwrap_or(false)
        {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// A member store that waits `delay` around every record access, so that
/// operations overlap the way they do against a remote store.
pub struct SlowStore {
    inner: MemoryClusterStore,
    delay: Duration,
}

impl SlowStore {
    pub fn new(inner: MemoryClusterStore, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

impl ClusterStore for SlowStore {
    fn backend(&self) -> &'static str {
        "slow-memory"
    }

    fn local_member(&self) -> &MemberId {
        self.inner.local_member()
    }

    async fn live_member_count(&self) -> LockResult<usize> {
        self.inner.live_member_count().await
    }

    async fn load_write_record(&self, handle: &str) -> LockResult<Option<WriteLockRecord>> {
        tokio::time::sleep(self.delay).await;
        self.inner.load_write_record(handle).await
    }

    async fn store_write_record(&self, record: &WriteLockRecord) -> LockResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.store_write_record(record).await
    }

    async fn delete_write_record(&self, handle: &str) -> LockResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.delete_write_record(handle).await
    }

    async fn load_read_record(&self, handle: &str) -> LockResult<Option<ReadLockRecord>> {
        tokio::time::sleep(self.delay).await;
        self.inner.load_read_record(handle).await
    }

    async fn store_read_record(&self, record: &ReadLockRecord) -> LockResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.store_read_record(record).await
    }

    async fn delete_read_record(&self, handle: &str) -> LockResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.delete_read_record(handle).await
    }

    async fn try_lock_access(
        &self,
        kind: AccessKind,
        handle: &str,
        timeout: Duration,
    ) -> LockResult<bool> {
        self.inner.try_lock_access(kind, handle, timeout).await
    }

    async fn unlock_access(&self, kind: AccessKind, handle: &str) -> LockResult<()> {
        self.inner.unlock_access(kind, handle).await
    }

    async fn force_unlock_access(&self, kind: AccessKind, handle: &str) -> LockResult<()> {
        self.inner.force_unlock_access(kind, handle).await
    }

    async fn mark_member_down(&self, member: &MemberId) -> LockResult<()> {
        self.inner.mark_member_down(member).await
    }

    async fn down_members(&self) -> LockResult<HashSet<MemberId>> {
        self.inner.down_members().await
    }

    fn subscribe_membership(&self) -> broadcast::Receiver<MembershipEvent> {
        self.inner.subscribe_membership()
    }
}
