//! Cluster read/write lock protocol.
//!
//! Emulates a named read/write lock on top of a replicated key-value map, a
//! per-key mutex primitive and a membership feed. Records of members that
//! leave the cluster, or that outlive their expiry, are reclaimed on the next
//! access to the same lock.

mod access;
pub mod config;
mod local;
pub mod member;
pub mod memory;
pub mod monitor;
pub mod record;
pub mod service;
pub mod store;

pub use config::{ClusterLockConfig, ClusterLockConfigBuilder};
pub use member::{MemberId, MembershipEvent};
pub use memory::{MemoryCluster, MemoryClusterStore};
pub use monitor::MembershipMonitor;
pub use record::{ReadLockRecord, StaleReason, WriteLockRecord};
pub use service::{ClusterLockService, LockState};
pub use store::{AccessKind, ClusterStore};
