//! Core traits and types for cluster-wide read/write locks.

pub mod error;
pub mod name;
pub mod prelude;
pub mod timeout;
pub mod traits;

pub use error::{LockError, LockResult};
pub use prelude::*;
