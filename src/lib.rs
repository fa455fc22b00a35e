//! Cluster-wide advisory read/write locks.
//!
//! Named locks with shared (read) and exclusive (write) modes, usable by
//! independent processes to coordinate access to a logical resource. The
//! protocol needs only a replicated key-value store and a membership feed;
//! locks of members that vanish without unlocking are reclaimed on the next
//! access to the same lock.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use lock_manager::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Every process sharing the Redis namespace is one cluster
//!     let store = RedisClusterStore::builder()
//!         .url("redis://localhost:6379")
//!         .build()
//!         .await?;
//!     let service = ClusterLockService::new(Arc::new(store), ClusterLockConfig::default());
//!
//!     let key = LockKey::named("invoice", "123");
//!     service.request_write_lock(&key, Some(Duration::from_secs(5)), false).await?;
//!
//!     // Critical section - no other member reads or writes invoice 123
//!     println!("Updating invoice...");
//!
//!     service.unlock(&key).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Substrates
//!
//! ## In-process
//!
//! [`MemoryCluster`] simulates several members inside one process, with
//! crash simulation through [`MemoryCluster::remove_member`].
//!
//! ## Redis
//!
//! [`RedisClusterStore`] keeps records and access mutexes in Redis and
//! detects departed members through heartbeat keys.
//!
//! # Crate Organization
//!
//! This is a meta-crate that re-exports types from:
//! - `lock-manager-core`: Lock keys, errors and the service trait
//! - `lock-manager-cluster`: The lock protocol and the in-process substrate
//! - `lock-manager-redis`: The Redis substrate

// Re-export core types and traits
pub use lock_manager_core::*;

// Re-export the protocol engine
#[allow(ambiguous_glob_reexports)]
pub use lock_manager_cluster::*;

// Re-export the Redis substrate
#[allow(ambiguous_glob_reexports)]
pub use lock_manager_redis::*;
