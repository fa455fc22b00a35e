//! Substrate consumed by the lock protocol.
//!
//! A [`ClusterStore`] bundles what the protocol needs from the replicated
//! store: the two record maps, the per-handle access mutexes, the shared set
//! of down members and the membership feed.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use lock_manager_core::error::LockResult;
use tokio::sync::broadcast;

use crate::member::{MemberId, MembershipEvent};
use crate::record::{ReadLockRecord, WriteLockRecord};

/// One of the two internal latches guarding a handle's records.
///
/// These serialize bookkeeping; they are not the read/write lock itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    Write,
    Read,
}

impl AccessKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessKind::Write => "write-access",
            AccessKind::Read => "read-access",
        }
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Replicated map, mutex and membership primitives shared by all members.
///
/// Access mutexes are owned by the local member and are re-entrant: taking a
/// mutex the member already holds succeeds and increments a hold count.
/// When a member leaves the cluster the store releases the mutexes it held.
pub trait ClusterStore: Send + Sync + 'static {
    /// Short backend name used in log fields.
    fn backend(&self) -> &'static str;

    /// Identity of the member this store acts for.
    fn local_member(&self) -> &MemberId;

    /// Number of members currently considered live.
    fn live_member_count(&self) -> impl Future<Output = LockResult<usize>> + Send;

    fn load_write_record(
        &self,
        handle: &str,
    ) -> impl Future<Output = LockResult<Option<WriteLockRecord>>> + Send;

    fn store_write_record(
        &self,
        record: &WriteLockRecord,
    ) -> impl Future<Output = LockResult<()>> + Send;

    fn delete_write_record(&self, handle: &str) -> impl Future<Output = LockResult<()>> + Send;

    fn load_read_record(
        &self,
        handle: &str,
    ) -> impl Future<Output = LockResult<Option<ReadLockRecord>>> + Send;

    fn store_read_record(
        &self,
        record: &ReadLockRecord,
    ) -> impl Future<Output = LockResult<()>> + Send;

    fn delete_read_record(&self, handle: &str) -> impl Future<Output = LockResult<()>> + Send;

    /// Takes an access mutex, waiting up to `timeout`.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The local member now holds the mutex
    /// * `Ok(false)` - Another member still held it when `timeout` ran out
    ///
    /// A zero timeout tries once.
    fn try_lock_access(
        &self,
        kind: AccessKind,
        handle: &str,
        timeout: Duration,
    ) -> impl Future<Output = LockResult<bool>> + Send;

    /// Drops one hold on a mutex owned by the local member.
    fn unlock_access(
        &self,
        kind: AccessKind,
        handle: &str,
    ) -> impl Future<Output = LockResult<()>> + Send;

    /// Releases a mutex outright, whatever its owner or hold count.
    fn force_unlock_access(
        &self,
        kind: AccessKind,
        handle: &str,
    ) -> impl Future<Output = LockResult<()>> + Send;

    /// Records that a member has left. Idempotent.
    fn mark_member_down(&self, member: &MemberId) -> impl Future<Output = LockResult<()>> + Send;

    fn down_members(&self) -> impl Future<Output = LockResult<HashSet<MemberId>>> + Send;

    /// Subscribes to membership changes.
    fn subscribe_membership(&self) -> broadcast::Receiver<MembershipEvent>;
}
