//! Lock records kept in the replicated maps.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::member::MemberId;

/// Gets current time in milliseconds since Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

fn expire_at(expiry: Duration) -> u64 {
    now_millis().saturating_add(expiry.as_millis() as u64)
}

/// Why a record no longer blocks other callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// Every holder has left the cluster.
    OwnerDown,
    Expired,
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaleReason::OwnerDown => f.write_str("owner down"),
            StaleReason::Expired => f.write_str("expired"),
        }
    }
}

/// The exclusive holder of a lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteLockRecord {
    pub handle: String,
    pub owner: MemberId,
    /// Absolute expiry, milliseconds since Unix epoch.
    pub expire_at_millis: u64,
}

impl WriteLockRecord {
    pub fn new(handle: impl Into<String>, owner: MemberId, expiry: Duration) -> Self {
        Self {
            handle: handle.into(),
            owner,
            expire_at_millis: expire_at(expiry),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expire_at_millis <= now_millis()
    }

    pub fn is_owned_by(&self, member: &MemberId) -> bool {
        &self.owner == member
    }

    /// Returns why this record may be reclaimed, or `None` if it is live.
    pub fn stale_reason(&self, down_members: &HashSet<MemberId>) -> Option<StaleReason> {
        if down_members.contains(&self.owner) {
            Some(StaleReason::OwnerDown)
        } else if self.is_expired() {
            Some(StaleReason::Expired)
        } else {
            None
        }
    }
}

/// The set of members sharing a read lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadLockRecord {
    pub handle: String,
    pub members: BTreeSet<MemberId>,
    /// Absolute expiry, milliseconds since Unix epoch.
    pub expire_at_millis: u64,
}

impl ReadLockRecord {
    /// Creates an empty record expiring `expiry` from now.
    pub fn new(handle: impl Into<String>, expiry: Duration) -> Self {
        Self {
            handle: handle.into(),
            members: BTreeSet::new(),
            expire_at_millis: expire_at(expiry),
        }
    }

    /// Adds a reader and pushes the expiry out to `expiry` from now.
    ///
    /// Returns false if the member was already a reader.
    pub fn add_member(&mut self, member: MemberId, expiry: Duration) -> bool {
        self.expire_at_millis = expire_at(expiry);
        self.members.insert(member)
    }

    pub fn remove_member(&mut self, member: &MemberId) -> bool {
        self.members.remove(member)
    }

    pub fn contains(&self, member: &MemberId) -> bool {
        self.members.contains(member)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_expired(&self) -> bool {
        self.expire_at_millis <= now_millis()
    }

    /// Drops readers that have left the cluster. Returns how many were dropped.
    pub fn prune(&mut self, down_members: &HashSet<MemberId>) -> usize {
        let before = self.members.len();
        self.members.retain(|member| !down_members.contains(member));
        before - self.members.len()
    }

    /// Returns why this record may be deleted outright, or `None` if it still
    /// has live readers. Call after [`prune`](Self::prune).
    pub fn stale_reason(&self) -> Option<StaleReason> {
        if self.members.is_empty() {
            Some(StaleReason::OwnerDown)
        } else if self.is_expired() {
            Some(StaleReason::Expired)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn down(ids: &[&str]) -> HashSet<MemberId> {
        ids.iter().map(|id| MemberId::from(*id)).collect()
    }

    #[test]
    fn test_live_write_record() {
        let record = WriteLockRecord::new("invoice-1", "a".into(), Duration::from_secs(60));
        assert!(!record.is_expired());
        assert_eq!(record.stale_reason(&down(&[])), None);
        assert!(record.is_owned_by(&"a".into()));
    }

    #[test]
    fn test_write_record_owner_down() {
        let record = WriteLockRecord::new("invoice-1", "a".into(), Duration::from_secs(60));
        assert_eq!(
            record.stale_reason(&down(&["a"])),
            Some(StaleReason::OwnerDown)
        );
    }

    #[test]
    fn test_write_record_expired() {
        let record = WriteLockRecord::new("invoice-1", "a".into(), Duration::ZERO);
        assert!(record.is_expired());
        assert_eq!(record.stale_reason(&down(&[])), Some(StaleReason::Expired));
    }

    #[test]
    fn test_reader_set_is_unique() {
        let mut record = ReadLockRecord::new("invoice-1", Duration::from_secs(60));
        assert!(record.add_member("a".into(), Duration::from_secs(60)));
        assert!(record.add_member("b".into(), Duration::from_secs(60)));
        assert!(!record.add_member("a".into(), Duration::from_secs(60)));
        assert_eq!(record.len(), 2);
    }

    #[test]
    fn test_adding_reader_refreshes_expiry() {
        let mut record = ReadLockRecord::new("invoice-1", Duration::ZERO);
        assert!(record.is_expired());
        record.add_member("a".into(), Duration::from_secs(60));
        assert!(!record.is_expired());
    }

    #[test]
    fn test_prune_down_readers() {
        let mut record = ReadLockRecord::new("invoice-1", Duration::from_secs(60));
        record.add_member("a".into(), Duration::from_secs(60));
        record.add_member("b".into(), Duration::from_secs(60));

        assert_eq!(record.prune(&down(&["a", "c"])), 1);
        assert_eq!(record.stale_reason(), None);

        assert_eq!(record.prune(&down(&["b"])), 1);
        assert_eq!(record.stale_reason(), Some(StaleReason::OwnerDown));
    }

    #[test]
    fn test_records_round_trip_through_json() {
        let mut record = ReadLockRecord::new("invoice-1", Duration::from_secs(60));
        record.add_member("a".into(), Duration::from_secs(60));
        let json = serde_json::to_string(&record).unwrap();
        let decoded: ReadLockRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, record);
    }
}
