//! Timeout value helpers.

use std::time::{Duration, Instant};

/// Represents a caller-supplied timeout for lock operations.
///
/// - `Some(duration)` - Wait up to this duration (zero means try once)
/// - `None` - Use the operation's configured default
pub type Timeout = Option<Duration>;

/// Resolves a caller timeout against the operation default.
pub fn resolve(timeout: Timeout, default: Duration) -> Duration {
    timeout.unwrap_or(default)
}

/// A point in time after which a blocking acquisition gives up.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    budget: Duration,
}

impl Deadline {
    /// Starts a deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            start: Instant::now(),
            budget,
        }
    }

    /// The full window this deadline was created with.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.start.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.start.elapsed() >= self.budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_falls_back_to_default() {
        assert_eq!(resolve(None, Duration::from_secs(60)), Duration::from_secs(60));
        assert_eq!(
            resolve(Some(Duration::ZERO), Duration::from_secs(60)),
            Duration::ZERO
        );
    }

    #[test]
    fn zero_deadline_is_already_expired() {
        let deadline = Deadline::after(Duration::ZERO);
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[test]
    fn remaining_never_exceeds_budget() {
        let deadline = Deadline::after(Duration::from_secs(5));
        assert!(deadline.remaining() <= deadline.budget());
        assert!(!deadline.is_expired());
    }
}
