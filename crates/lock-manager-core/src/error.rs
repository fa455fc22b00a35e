//! Error types for lock manager operations.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during lock operations.
#[derive(Error, Debug)]
pub enum LockError {
    /// The lock, or one of its internal access latches, could not be granted
    /// within the caller's window. Retryable by the caller.
    #[error("lock request timed out after {0:?}")]
    Timeout(Duration),

    /// The cluster cannot serve lock requests (member left, too few live
    /// members, local member declared down).
    #[error("lock service unavailable: {0}")]
    Unavailable(String),

    /// The caller asked for a conversion it is not entitled to.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Invalid lock key or configuration value.
    #[error("invalid lock name: {0}")]
    InvalidName(String),

    /// Substrate connection failed.
    #[error("connection error: {0}")]
    Connection(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Substrate command failed.
    #[error("backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl LockError {
    /// Builds a [`LockError::Backend`] from a message.
    pub fn backend(message: impl Into<String>) -> Self {
        LockError::Backend(Box::new(std::io::Error::other(message.into())))
    }

    /// Returns true if the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LockError::Timeout(_))
    }

    /// Returns true for failures of the cluster itself rather than of the
    /// request. These need operator attention, not a retry.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            LockError::Unavailable(_) | LockError::Connection(_) | LockError::Backend(_)
        )
    }
}

/// Result type for lock operations.
pub type LockResult<T> = Result<T, LockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_the_only_retryable_error() {
        assert!(LockError::Timeout(Duration::from_secs(2)).is_retryable());
        assert!(!LockError::Unavailable("gone".into()).is_retryable());
        assert!(!LockError::ProtocolViolation("two readers".into()).is_retryable());
        assert!(!LockError::backend("boom").is_retryable());
    }

    #[test]
    fn substrate_failures_are_unavailable() {
        assert!(LockError::backend("boom").is_unavailable());
        assert!(LockError::Unavailable("gone".into()).is_unavailable());
        assert!(!LockError::Timeout(Duration::ZERO).is_unavailable());
    }

    #[test]
    fn timeout_message_names_the_window() {
        let message = LockError::Timeout(Duration::from_secs(2)).to_string();
        assert_eq!(message, "lock request timed out after 2s");
    }
}
