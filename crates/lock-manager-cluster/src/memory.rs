//! In-process cluster substrate.
//!
//! [`MemoryCluster`] plays the role of the replicated store for members that
//! live in the same process. Each [`MemoryClusterStore`] acts for one member.
//! Removing a member releases every access mutex it held and announces the
//! departure on the membership feed, the way a replicated store reacts to a
//! member crash.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use lock_manager_core::error::{LockError, LockResult};
use lock_manager_core::timeout::Deadline;
use tokio::sync::{broadcast, Notify};
use tracing::debug;

use crate::member::{MemberId, MembershipEvent};
use crate::record::{ReadLockRecord, WriteLockRecord};
use crate::store::{AccessKind, ClusterStore};

const EVENT_CAPACITY: usize = 256;
/// Upper bound on one wait for an access mutex, so expiring holds are seen.
const RECHECK_INTERVAL: Duration = Duration::from_millis(50);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct AccessHold {
    owner: MemberId,
    count: u32,
    expires_at: Option<Instant>,
}

impl AccessHold {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }
}

struct ClusterState {
    members: Mutex<HashSet<MemberId>>,
    write_locks: Mutex<HashMap<String, WriteLockRecord>>,
    read_locks: Mutex<HashMap<String, ReadLockRecord>>,
    access: Mutex<HashMap<(AccessKind, String), AccessHold>>,
    access_released: Notify,
    access_ttl: Option<Duration>,
    down_members: Mutex<HashSet<MemberId>>,
    events: broadcast::Sender<MembershipEvent>,
}

impl ClusterState {
    fn is_member(&self, member: &MemberId) -> bool {
        lock(&self.members).contains(member)
    }

    fn try_take_access(&self, kind: AccessKind, handle: &str, member: &MemberId) -> bool {
        let expires_at = self.access_ttl.map(|ttl| Instant::now() + ttl);
        let mut access = lock(&self.access);
        match access.get_mut(&(kind, handle.to_string())) {
            Some(hold) if &hold.owner == member && !hold.is_expired() => {
                hold.count += 1;
                hold.expires_at = expires_at;
                true
            }
            Some(hold) if !hold.is_expired() => false,
            _ => {
                access.insert(
                    (kind, handle.to_string()),
                    AccessHold {
                        owner: member.clone(),
                        count: 1,
                        expires_at,
                    },
                );
                true
            }
        }
    }

    fn release_access(&self, kind: AccessKind, handle: &str, member: &MemberId) -> LockResult<()> {
        {
            let mut access = lock(&self.access);
            let key = (kind, handle.to_string());
            match access.get_mut(&key) {
                Some(hold) if &hold.owner == member => {
                    hold.count -= 1;
                    if hold.count == 0 {
                        access.remove(&key);
                    }
                }
                _ => {
                    return Err(LockError::ProtocolViolation(format!(
                        "{kind} on '{handle}' is not held by member {member}"
                    )));
                }
            }
        }
        self.access_released.notify_waiters();
        Ok(())
    }

    fn force_release_access(&self, kind: AccessKind, handle: &str) {
        lock(&self.access).remove(&(kind, handle.to_string()));
        self.access_released.notify_waiters();
    }

    fn release_all_access_of(&self, member: &MemberId) -> usize {
        let released = {
            let mut access = lock(&self.access);
            let before = access.len();
            access.retain(|_, hold| &hold.owner != member);
            before - access.len()
        };
        self.access_released.notify_waiters();
        released
    }
}

/// An in-process cluster shared by any number of members.
#[derive(Clone)]
pub struct MemoryCluster {
    state: Arc<ClusterState>,
}

impl MemoryCluster {
    /// Creates an empty cluster whose access mutexes never expire.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates an empty cluster whose access mutex holds lapse `ttl` after
    /// they were last taken, like the TTL a replicated store puts on them.
    pub fn with_access_ttl(ttl: Duration) -> Self {
        Self::build(Some(ttl))
    }

    fn build(access_ttl: Option<Duration>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Arc::new(ClusterState {
                members: Mutex::new(HashSet::new()),
                write_locks: Mutex::new(HashMap::new()),
                read_locks: Mutex::new(HashMap::new()),
                access: Mutex::new(HashMap::new()),
                access_released: Notify::new(),
                access_ttl,
                down_members: Mutex::new(HashSet::new()),
                events,
            }),
        }
    }

    /// Adds a member with a fresh ID and returns its store.
    pub fn join(&self) -> MemoryClusterStore {
        self.join_as(MemberId::random())
    }

    /// Adds a member with the given ID and returns its store.
    pub fn join_as(&self, member: impl Into<MemberId>) -> MemoryClusterStore {
        let member = member.into();
        lock(&self.state.members).insert(member.clone());
        let _ = self
            .state
            .events
            .send(MembershipEvent::MemberAdded(member.clone()));
        MemoryClusterStore {
            member,
            state: self.state.clone(),
        }
    }

    /// Removes a member as if its process died.
    ///
    /// Its access mutexes are released immediately; its lock records stay
    /// behind until another member reclaims them.
    pub fn remove_member(&self, member: &MemberId) {
        if !lock(&self.state.members).remove(member) {
            return;
        }
        let released = self.state.release_all_access_of(member);
        debug!(member = %member, released, "member removed from memory cluster");
        let _ = self
            .state
            .events
            .send(MembershipEvent::MemberRemoved(member.clone()));
    }

    /// Returns the live members.
    pub fn members(&self) -> Vec<MemberId> {
        lock(&self.state.members).iter().cloned().collect()
    }
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

/// One member's view of a [`MemoryCluster`].
pub struct MemoryClusterStore {
    member: MemberId,
    state: Arc<ClusterState>,
}

impl MemoryClusterStore {
    /// Leaves the cluster. Further operations fail with `Unavailable`.
    pub fn leave(&self) {
        MemoryCluster {
            state: self.state.clone(),
        }
        .remove_member(&self.member);
    }

    fn ensure_active(&self) -> LockResult<()> {
        if self.state.is_member(&self.member) {
            Ok(())
        } else {
            Err(LockError::Unavailable(format!(
                "member {} is not active in the cluster",
                self.member
            )))
        }
    }
}

impl ClusterStore for MemoryClusterStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn local_member(&self) -> &MemberId {
        &self.member
    }

    async fn live_member_count(&self) -> LockResult<usize> {
        self.ensure_active()?;
        Ok(lock(&self.state.members).len())
    }

    async fn load_write_record(&self, handle: &str) -> LockResult<Option<WriteLockRecord>> {
        self.ensure_active()?;
        Ok(lock(&self.state.write_locks).get(handle).cloned())
    }

    async fn store_write_record(&self, record: &WriteLockRecord) -> LockResult<()> {
        self.ensure_active()?;
        lock(&self.state.write_locks).insert(record.handle.clone(), record.clone());
        Ok(())
    }

    async fn delete_write_record(&self, handle: &str) -> LockResult<()> {
        self.ensure_active()?;
        lock(&self.state.write_locks).remove(handle);
        Ok(())
    }

    async fn load_read_record(&self, handle: &str) -> LockResult<Option<ReadLockRecord>> {
        self.ensure_active()?;
        Ok(lock(&self.state.read_locks).get(handle).cloned())
    }

    async fn store_read_record(&self, record: &ReadLockRecord) -> LockResult<()> {
        self.ensure_active()?;
        lock(&self.state.read_locks).insert(record.handle.clone(), record.clone());
        Ok(())
    }

    async fn delete_read_record(&self, handle: &str) -> LockResult<()> {
        self.ensure_active()?;
        lock(&self.state.read_locks).remove(handle);
        Ok(())
    }

    async fn try_lock_access(
        &self,
        kind: AccessKind,
        handle: &str,
        timeout: Duration,
    ) -> LockResult<bool> {
        let deadline = Deadline::after(timeout);
        loop {
            self.ensure_active()?;

            // Register for the wakeup before checking, so a release between
            // the check and the wait is not missed.
            let released = self.state.access_released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if self.state.try_take_access(kind, handle, &self.member) {
                return Ok(true);
            }

            let remaining = deadline.remaining();
            if remaining.is_zero() {
                return Ok(false);
            }
            let _ = tokio::time::timeout(remaining.min(RECHECK_INTERVAL), released).await;
        }
    }

    async fn unlock_access(&self, kind: AccessKind, handle: &str) -> LockResult<()> {
        self.ensure_active()?;
        self.state.release_access(kind, handle, &self.member)
    }

    async fn force_unlock_access(&self, kind: AccessKind, handle: &str) -> LockResult<()> {
        self.ensure_active()?;
        self.state.force_release_access(kind, handle);
        Ok(())
    }

    async fn mark_member_down(&self, member: &MemberId) -> LockResult<()> {
        lock(&self.state.down_members).insert(member.clone());
        Ok(())
    }

    async fn down_members(&self) -> LockResult<HashSet<MemberId>> {
        self.ensure_active()?;
        Ok(lock(&self.state.down_members).clone())
    }

    fn subscribe_membership(&self) -> broadcast::Receiver<MembershipEvent> {
        self.state.events.subscribe()
    }
}
