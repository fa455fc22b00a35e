//! The read/write lock protocol engine.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use lock_manager_core::error::{LockError, LockResult};
use lock_manager_core::name::LockKey;
use lock_manager_core::timeout::{resolve, Deadline};
use lock_manager_core::traits::LockManagementService;
use tracing::{debug, instrument, warn};

use crate::access::AccessPair;
use crate::config::ClusterLockConfig;
use crate::local::LocalLocks;
use crate::member::MemberId;
use crate::monitor::MembershipMonitor;
use crate::record::{ReadLockRecord, WriteLockRecord};
use crate::store::ClusterStore;

/// Holders of one lock as seen by a non-locking read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockState {
    pub writer: Option<MemberId>,
    pub readers: BTreeSet<MemberId>,
}

impl LockState {
    pub fn is_free(&self) -> bool {
        self.writer.is_none() && self.readers.is_empty()
    }
}

/// Outcome of a successful upgrade attempt.
enum Promotion {
    Granted,
    AlreadyWriter,
}

/// Cluster-wide read/write locks built on a [`ClusterStore`].
///
/// One service acts for one member. The write lock is represented by a
/// [`WriteLockRecord`] plus the writer keeping both access mutexes of the
/// handle until it unlocks; readers are listed in a [`ReadLockRecord`] and
/// hold no mutex between calls. Records whose holders left the cluster or
/// outlived their expiry are reclaimed by whichever request next touches
/// the handle.
///
/// # Example
///
/// ```rust,ignore
/// let cluster = MemoryCluster::new();
/// let service = ClusterLockService::new(Arc::new(cluster.join()), ClusterLockConfig::default());
///
/// let key = LockKey::named("invoice", "123");
/// service.request_write_lock(&key, Some(Duration::from_secs(5)), false).await?;
/// service.unlock(&key).await?;
/// ```
pub struct ClusterLockService<S: ClusterStore> {
    store: Arc<S>,
    config: ClusterLockConfig,
    local: LocalLocks,
    _monitor: MembershipMonitor,
}

impl<S: ClusterStore> ClusterLockService<S> {
    /// Creates the service and starts its membership monitor.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(store: Arc<S>, config: ClusterLockConfig) -> Self {
        let monitor = MembershipMonitor::spawn(store.clone());
        Self {
            store,
            config,
            local: LocalLocks::default(),
            _monitor: monitor,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &ClusterLockConfig {
        &self.config
    }

    /// The member this service acts for.
    pub fn member(&self) -> &MemberId {
        self.store.local_member()
    }

    /// Reads the current holders of `key` without taking the access mutexes.
    ///
    /// Holders that are down or expired are left out but not deleted; the
    /// result is a snapshot that may be stale by the time it is used.
    pub async fn lock_state(&self, key: &LockKey) -> LockResult<LockState> {
        key.validate()?;
        let handle = key.handle();
        let down = self.store.down_members().await?;

        let writer = self
            .store
            .load_write_record(&handle)
            .await?
            .filter(|record| record.stale_reason(&down).is_none())
            .map(|record| record.owner);

        let readers = match self.store.load_read_record(&handle).await? {
            Some(mut record) => {
                record.prune(&down);
                if record.is_expired() {
                    BTreeSet::new()
                } else {
                    record.members
                }
            }
            None => BTreeSet::new(),
        };

        Ok(LockState { writer, readers })
    }

    /// Fails unless the cluster may grant locks right now.
    async fn ensure_serviceable(&self) -> LockResult<()> {
        let live = self.store.live_member_count().await?;
        if live < self.config.min_cluster_size {
            return Err(LockError::Unavailable(format!(
                "minimum number of cluster members is {} but only {} are live",
                self.config.min_cluster_size, live
            )));
        }
        if self.store.down_members().await?.contains(self.member()) {
            return Err(LockError::Unavailable(format!(
                "member {} has been declared down by the cluster",
                self.member()
            )));
        }
        Ok(())
    }

    /// Loads the write record, deleting it if its owner is down or it expired.
    ///
    /// Returns the record only if it is still live. Caller holds write-access.
    async fn evict_stale_writer(
        &self,
        handle: &str,
        down: &HashSet<MemberId>,
    ) -> LockResult<Option<WriteLockRecord>> {
        let Some(record) = self.store.load_write_record(handle).await? else {
            return Ok(None);
        };
        match record.stale_reason(down) {
            Some(reason) => {
                debug!(lock.handle = %handle, owner = %record.owner, %reason, "evicting stale write lock");
                self.store.delete_write_record(handle).await?;
                Ok(None)
            }
            None => Ok(Some(record)),
        }
    }

    /// Loads the read record, dropping readers that are down.
    ///
    /// The record is deleted when no reader is left or it expired, and
    /// rewritten when only some readers were dropped. Returns it only if it
    /// still has live readers. Caller holds write-access.
    async fn evict_stale_readers(
        &self,
        handle: &str,
        down: &HashSet<MemberId>,
    ) -> LockResult<Option<ReadLockRecord>> {
        let Some(mut record) = self.store.load_read_record(handle).await? else {
            return Ok(None);
        };
        let pruned = record.prune(down);
        match record.stale_reason() {
            Some(reason) => {
                debug!(lock.handle = %handle, readers = record.len(), %reason, "evicting stale read lock");
                self.store.delete_read_record(handle).await?;
                Ok(None)
            }
            None => {
                if pruned > 0 {
                    debug!(lock.handle = %handle, pruned, "dropping readers of down members");
                    self.store.store_read_record(&record).await?;
                }
                Ok(Some(record))
            }
        }
    }

    /// Adds the local member to the handle's readers.
    async fn grant_read(&self, handle: &str, timeout: Duration) -> LockResult<()> {
        let down = self.store.down_members().await?;
        if let Some(writer) = self.evict_stale_writer(handle, &down).await? {
            debug!(lock.handle = %handle, owner = %writer.owner, "read refused: write lock is held");
            return Err(LockError::Timeout(timeout));
        }

        let mut record = self
            .evict_stale_readers(handle, &down)
            .await?
            .unwrap_or_else(|| ReadLockRecord::new(handle, self.config.lock_expiry));
        record.add_member(self.member().clone(), self.config.lock_expiry);
        self.store.store_read_record(&record).await
    }

    /// Records the local member as writer once both sides are clear.
    async fn grant_write(&self, handle: &str, timeout: Duration) -> LockResult<()> {
        let down = self.store.down_members().await?;
        if let Some(writer) = self.evict_stale_writer(handle, &down).await? {
            debug!(lock.handle = %handle, owner = %writer.owner, "write refused: write lock is held");
            return Err(LockError::Timeout(timeout));
        }
        if let Some(readers) = self.evict_stale_readers(handle, &down).await? {
            debug!(lock.handle = %handle, readers = readers.len(), "write refused: read lock is held");
            return Err(LockError::Timeout(timeout));
        }

        let record = WriteLockRecord::new(handle, self.member().clone(), self.config.lock_expiry);
        self.store.store_write_record(&record).await
    }

    /// Replaces the local member's write record with a read record.
    async fn demote(&self, handle: &str) -> LockResult<()> {
        let down = self.store.down_members().await?;
        let member = self.member();
        let writer = self.evict_stale_writer(handle, &down).await?;
        let readers = self.evict_stale_readers(handle, &down).await?;

        if let Some(readers) = readers {
            if readers.contains(member) {
                if writer.as_ref().is_some_and(|w| w.is_owned_by(member)) {
                    self.store.delete_write_record(handle).await?;
                }
                debug!(lock.handle = %handle, "read lock already granted");
                return Ok(());
            }
        }

        match writer {
            Some(writer) if writer.is_owned_by(member) => {
                self.store.delete_write_record(handle).await?;
                let mut record = ReadLockRecord::new(handle, self.config.lock_expiry);
                record.add_member(member.clone(), self.config.lock_expiry);
                self.store.store_read_record(&record).await
            }
            Some(writer) => Err(LockError::ProtocolViolation(format!(
                "write lock on '{handle}' is held by member {}",
                writer.owner
            ))),
            None => Err(LockError::ProtocolViolation(format!(
                "no write lock held on '{handle}'"
            ))),
        }
    }

    /// Replaces the local member's sole read membership with a write record.
    async fn promote(&self, handle: &str) -> LockResult<Promotion> {
        let down = self.store.down_members().await?;
        let member = self.member();

        if let Some(writer) = self.evict_stale_writer(handle, &down).await? {
            if writer.is_owned_by(member) {
                return Ok(Promotion::AlreadyWriter);
            }
            return Err(LockError::ProtocolViolation(format!(
                "write lock on '{handle}' is held by member {}",
                writer.owner
            )));
        }

        match self.evict_stale_readers(handle, &down).await? {
            Some(readers) if readers.contains(member) && readers.len() == 1 => {
                self.store.delete_read_record(handle).await?;
                let record = WriteLockRecord::new(handle, member.clone(), self.config.lock_expiry);
                self.store.store_write_record(&record).await?;
                Ok(Promotion::Granted)
            }
            Some(readers) if readers.contains(member) => {
                Err(LockError::ProtocolViolation(format!(
                    "cannot upgrade '{handle}': {} other readers hold it",
                    readers.len() - 1
                )))
            }
            _ => Err(LockError::ProtocolViolation(format!(
                "no read lock held on '{handle}'"
            ))),
        }
    }

    /// Whether the local member appears in either record of `handle`.
    ///
    /// Read without the access mutexes. Only the caller's own entries are
    /// looked at, and no other member can add those.
    async fn holds_any(&self, handle: &str) -> LockResult<bool> {
        let member = self.member();
        if let Some(writer) = self.store.load_write_record(handle).await? {
            if writer.is_owned_by(member) {
                return Ok(true);
            }
        }
        Ok(self
            .store
            .load_read_record(handle)
            .await?
            .is_some_and(|readers| readers.contains(member)))
    }

    /// Removes the local member's write record and read membership.
    async fn release_records(&self, handle: &str) -> LockResult<()> {
        let down = self.store.down_members().await?;
        let member = self.member();

        if let Some(writer) = self.store.load_write_record(handle).await? {
            if writer.is_owned_by(member) || writer.stale_reason(&down).is_some() {
                self.store.delete_write_record(handle).await?;
            }
        }

        if let Some(mut readers) = self.store.load_read_record(handle).await? {
            let removed = readers.remove_member(member);
            let pruned = readers.prune(&down);
            if readers.stale_reason().is_some() {
                self.store.delete_read_record(handle).await?;
            } else if removed || pruned > 0 {
                self.store.store_read_record(&readers).await?;
            }
        }
        Ok(())
    }
}

impl<S: ClusterStore> LockManagementService for ClusterLockService<S> {
    #[instrument(skip(self), fields(lock.handle = %key, member = %self.member(), backend = self.store.backend()))]
    async fn request_read_lock(
        &self,
        key: &LockKey,
        timeout: Option<Duration>,
        release_on_commit: bool,
    ) -> LockResult<()> {
        key.validate()?;
        self.ensure_serviceable().await?;
        let handle = key.handle();
        let deadline = Deadline::after(resolve(timeout, self.config.default_read_timeout));
        debug!("requesting read lock");

        let _local = self.local.lock(&handle, &deadline).await?;
        let access = AccessPair::new(self.store.as_ref(), &handle);
        let result = match access.lock_write_access(&deadline).await {
            Ok(()) => {
                let granted = self.grant_read(&handle, deadline.budget()).await;
                access.release_write_access().await;
                granted
            }
            Err(e) => Err(e),
        };

        match &result {
            Ok(()) => debug!("read lock granted"),
            Err(LockError::Timeout(_)) => warn!("read lock refused: write lock held"),
            Err(e) => warn!(error = %e, "read lock request failed"),
        }
        result
    }

    #[instrument(skip(self), fields(lock.handle = %key, member = %self.member(), backend = self.store.backend()))]
    async fn request_write_lock(
        &self,
        key: &LockKey,
        timeout: Option<Duration>,
        release_on_commit: bool,
    ) -> LockResult<()> {
        key.validate()?;
        self.ensure_serviceable().await?;
        let handle = key.handle();
        let deadline = Deadline::after(resolve(timeout, self.config.default_write_timeout));
        debug!("requesting write lock");

        let _local = self.local.lock(&handle, &deadline).await?;
        let access = AccessPair::new(self.store.as_ref(), &handle);
        let result = match access.lock_both(&deadline).await {
            // On success both access mutexes stay held until unlock.
            Ok(()) => match self.grant_write(&handle, deadline.budget()).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    access.release_both().await;
                    Err(e)
                }
            },
            Err(e) => Err(e),
        };

        match &result {
            Ok(()) => debug!("write lock granted"),
            Err(LockError::Timeout(_)) => warn!("write lock refused: write or read lock held"),
            Err(e) => warn!(error = %e, "write lock request failed"),
        }
        result
    }

    #[instrument(skip(self), fields(lock.handle = %key, member = %self.member(), backend = self.store.backend()))]
    async fn convert_to_read_lock(&self, key: &LockKey, timeout: Option<Duration>) -> LockResult<()> {
        key.validate()?;
        self.ensure_serviceable().await?;
        let handle = key.handle();
        let deadline = Deadline::after(resolve(timeout, self.config.default_read_timeout));
        debug!("requesting conversion to read lock");

        let _local = self.local.lock(&handle, &deadline).await?;
        let access = AccessPair::new(self.store.as_ref(), &handle);
        access.lock_both(&deadline).await?;
        match self.demote(&handle).await {
            Ok(()) => {
                // The writer's long-lived holds go together with this call's.
                access.force_release_both().await;
                debug!("converted to read lock");
                Ok(())
            }
            Err(e) => {
                access.release_both().await;
                warn!(error = %e, "conversion to read lock refused");
                Err(e)
            }
        }
    }

    #[instrument(skip(self), fields(lock.handle = %key, member = %self.member(), backend = self.store.backend()))]
    async fn convert_to_write_lock(&self, key: &LockKey, timeout: Option<Duration>) -> LockResult<()> {
        key.validate()?;
        self.ensure_serviceable().await?;
        let handle = key.handle();
        let deadline = Deadline::after(resolve(timeout, self.config.default_write_timeout));
        debug!("requesting conversion to write lock");

        let _local = self.local.lock(&handle, &deadline).await?;
        let access = AccessPair::new(self.store.as_ref(), &handle);
        access.lock_both(&deadline).await?;
        match self.promote(&handle).await {
            // Keep both holds for the life of the write lock.
            Ok(Promotion::Granted) => {
                debug!("converted to write lock");
                Ok(())
            }
            Ok(Promotion::AlreadyWriter) => {
                access.release_both().await;
                debug!("write lock already granted");
                Ok(())
            }
            Err(e) => {
                access.release_both().await;
                warn!(error = %e, "conversion to write lock refused");
                Err(e)
            }
        }
    }

    #[instrument(skip(self), fields(lock.handle = %key, member = %self.member(), backend = self.store.backend()))]
    async fn unlock(&self, key: &LockKey) -> LockResult<()> {
        key.validate()?;
        self.ensure_serviceable().await?;
        let handle = key.handle();
        let deadline = Deadline::after(self.config.unlock_timeout);
        debug!("releasing lock");

        let _local = match self.local.lock(&handle, &deadline).await {
            Ok(guard) => guard,
            Err(LockError::Timeout(_)) => {
                warn!("could not unlock: another operation of this member is still running");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if !self.holds_any(&handle).await? {
            debug!("nothing to release");
            return Ok(());
        }

        let access = AccessPair::new(self.store.as_ref(), &handle);
        match access.lock_both(&deadline).await {
            Ok(()) => {}
            Err(LockError::Timeout(_)) => {
                warn!("could not unlock: access mutexes are held by another member");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        let result = self.release_records(&handle).await;
        access.force_release_both().await;
        if result.is_ok() {
            debug!("lock released");
        }
        result
    }
}
