//! Lock key naming.
//!
//! A lock is identified by a lock type plus an optional lock name. Both
//! record stores are keyed by the canonical handle derived here.

use std::fmt;

use crate::error::{LockError, LockResult};

/// Separator between lock type and lock name in a handle.
pub const HANDLE_SEPARATOR: char = '-';

/// Identity of a logical lock: a type with an optional instance name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    lock_type: String,
    lock_name: Option<String>,
}

impl LockKey {
    /// Creates a key for a lock type with no instance name.
    pub fn new(lock_type: impl Into<String>) -> Self {
        Self {
            lock_type: lock_type.into(),
            lock_name: None,
        }
    }

    /// Creates a key for a named instance of a lock type.
    ///
    /// An empty name is treated as absent.
    pub fn named(lock_type: impl Into<String>, lock_name: impl Into<String>) -> Self {
        let lock_name = lock_name.into();
        Self {
            lock_type: lock_type.into(),
            lock_name: (!lock_name.is_empty()).then_some(lock_name),
        }
    }

    pub fn lock_type(&self) -> &str {
        &self.lock_type
    }

    pub fn lock_name(&self) -> Option<&str> {
        self.lock_name.as_deref()
    }

    /// Returns the canonical handle: `type` or `type-name`.
    pub fn handle(&self) -> String {
        handle(&self.lock_type, self.lock_name.as_deref())
    }

    /// Checks that the key maps to a handle no other key can produce.
    ///
    /// The type must be non-empty and must not contain the separator, so the
    /// first separator in a handle always ends the type.
    pub fn validate(&self) -> LockResult<()> {
        if self.lock_type.is_empty() {
            return Err(LockError::InvalidName("lock type is empty".to_string()));
        }
        if self.lock_type.contains(HANDLE_SEPARATOR) {
            return Err(LockError::InvalidName(format!(
                "lock type '{}' must not contain '{}'",
                self.lock_type, HANDLE_SEPARATOR
            )));
        }
        Ok(())
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.handle())
    }
}

/// Derives the canonical handle for a lock type and optional lock name.
pub fn handle(lock_type: &str, lock_name: Option<&str>) -> String {
    match lock_name {
        Some(name) if !name.is_empty() => format!("{lock_type}{HANDLE_SEPARATOR}{name}"),
        _ => lock_type.to_string(),
    }
}
