//! Convenience prelude for lock manager types.

pub use crate::error::{LockError, LockResult};
pub use crate::name::LockKey;
pub use crate::traits::{LockManagementService, LockManagementServiceExt};
