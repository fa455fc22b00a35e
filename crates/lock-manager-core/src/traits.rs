//! Core traits for cluster-wide read/write locks.

use std::future::Future;
use std::time::Duration;

use crate::error::LockResult;
use crate::name::LockKey;

// ============================================================================
// Lock Management Service Trait
// ============================================================================

/// A named, cluster-wide advisory read/write lock service.
///
/// Any number of members may hold the read lock on a key at once; the write
/// lock is exclusive against readers and other writers. Locks are identified
/// by [`LockKey`] and are held until [`unlock`](Self::unlock), until they
/// expire, or until the holding member leaves the cluster.
///
/// # Example
///
/// ```rust,ignore
/// let key = LockKey::named("invoice", "123");
///
/// service.request_write_lock(&key, Some(Duration::from_secs(5)), false).await?;
/// // Exclusive section
/// update_invoice().await?;
/// service.unlock(&key).await?;
/// ```
pub trait LockManagementService: Send + Sync {
    /// Acquires a shared read lock.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Maximum time to wait. `None` uses the configured read
    ///   default; zero tries once.
    /// * `release_on_commit` - Bind the lock to the caller's transaction where
    ///   the backend has one.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The caller is now a reader
    /// * `Err(LockError::Timeout)` - A writer still holds the key
    /// * `Err(LockError::Unavailable)` - The cluster cannot serve requests
    fn request_read_lock(
        &self,
        key: &LockKey,
        timeout: Option<Duration>,
        release_on_commit: bool,
    ) -> impl Future<Output = LockResult<()>> + Send;

    /// Acquires the exclusive write lock.
    ///
    /// Fails with `LockError::Timeout` while another writer or any live
    /// reader holds the key.
    fn request_write_lock(
        &self,
        key: &LockKey,
        timeout: Option<Duration>,
        release_on_commit: bool,
    ) -> impl Future<Output = LockResult<()>> + Send;

    /// Downgrades a held write lock to a read lock.
    fn convert_to_read_lock(
        &self,
        key: &LockKey,
        timeout: Option<Duration>,
    ) -> impl Future<Output = LockResult<()>> + Send;

    /// Upgrades a held read lock to the write lock.
    ///
    /// Only the sole reader may upgrade; otherwise the call fails with
    /// `LockError::ProtocolViolation` and nothing changes.
    fn convert_to_write_lock(
        &self,
        key: &LockKey,
        timeout: Option<Duration>,
    ) -> impl Future<Output = LockResult<()>> + Send;

    /// Releases whatever the caller holds on `key`.
    ///
    /// Best-effort: releasing a lock that was never held, or was already lost
    /// to expiry, succeeds silently. Only an unavailable cluster is reported.
    fn unlock(&self, key: &LockKey) -> impl Future<Output = LockResult<()>> + Send;
}

// ============================================================================
// Convenience Extensions
// ============================================================================

/// Extension trait with the short forms callers use most.
pub trait LockManagementServiceExt: LockManagementService {
    /// Read-locks a lock type with the default timeout.
    fn request_read(&self, lock_type: &str) -> impl Future<Output = LockResult<()>> + Send
    where
        Self: Sync,
    {
        let key = LockKey::new(lock_type);
        async move { self.request_read_lock(&key, None, false).await }
    }

    /// Read-locks a named lock.
    fn request_read_named(
        &self,
        lock_type: &str,
        lock_name: &str,
        timeout: Option<Duration>,
    ) -> impl Future<Output = LockResult<()>> + Send
    where
        Self: Sync,
    {
        let key = LockKey::named(lock_type, lock_name);
        async move { self.request_read_lock(&key, timeout, false).await }
    }

    /// Write-locks a lock type with the default timeout.
    fn request_write(&self, lock_type: &str) -> impl Future<Output = LockResult<()>> + Send
    where
        Self: Sync,
    {
        let key = LockKey::new(lock_type);
        async move { self.request_write_lock(&key, None, false).await }
    }

    /// Write-locks a named lock.
    fn request_write_named(
        &self,
        lock_type: &str,
        lock_name: &str,
        timeout: Option<Duration>,
    ) -> impl Future<Output = LockResult<()>> + Send
    where
        Self: Sync,
    {
        let key = LockKey::named(lock_type, lock_name);
        async move { self.request_write_lock(&key, timeout, false).await }
    }

    /// Releases a named lock.
    fn unlock_named(
        &self,
        lock_type: &str,
        lock_name: &str,
    ) -> impl Future<Output = LockResult<()>> + Send
    where
        Self: Sync,
    {
        let key = LockKey::named(lock_type, lock_name);
        async move { self.unlock(&key).await }
    }
}

// Blanket implementation for all lock services
impl<T: LockManagementService> LockManagementServiceExt for T {}
