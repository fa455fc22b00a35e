//! Redis substrate for the cluster read/write lock protocol.
//!
//! Stores lock records as JSON strings, implements the access mutexes with
//! Lua scripts over Redis hashes, and derives cluster membership from
//! per-member heartbeat keys.

pub mod keys;
pub mod membership;
pub mod scripts;
pub mod store;

pub use keys::KeySpace;
pub use store::{RedisClusterStore, RedisClusterStoreBuilder};
