//! Per-handle latches for operations issued by the same member.
//!
//! The access mutexes are owned by a member, so they do not keep two tasks
//! of one member apart. Every operation on a handle first takes that
//! handle's local latch and keeps it until the operation returns.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use lock_manager_core::error::{LockError, LockResult};
use lock_manager_core::timeout::Deadline;
use tokio::sync::OwnedMutexGuard;

/// Map of local handle latches.
#[derive(Debug, Default)]
pub(crate) struct LocalLocks(Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>);

impl LocalLocks {
    /// Waits for the latch of `handle` until `deadline` runs out.
    pub(crate) async fn lock(
        &self,
        handle: &str,
        deadline: &Deadline,
    ) -> LockResult<OwnedMutexGuard<()>> {
        let latch = self.key_mutex(handle);
        tokio::time::timeout(deadline.remaining(), latch.lock_owned())
            .await
            .map_err(|_| LockError::Timeout(deadline.budget()))
    }

    fn key_mutex(&self, handle: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut latches = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        // Latches nobody holds or waits on are only referenced by the map.
        latches.retain(|_, latch| Arc::strong_count(latch) > 1);
        latches.entry(handle.to_string()).or_default().clone()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_same_handle_is_exclusive() {
        let locks = LocalLocks::default();
        let deadline = Deadline::after(Duration::ZERO);

        let guard = locks.lock("h", &deadline).await.unwrap();
        let err = locks.lock("h", &deadline).await.unwrap_err();
        assert!(matches!(err, LockError::Timeout(d) if d.is_zero()));

        // Other handles are independent.
        let _other = locks.lock("g", &deadline).await.unwrap();

        drop(guard);
        locks.lock("h", &deadline).await.unwrap();
    }

    #[tokio::test]
    async fn test_waiter_gets_latch_on_release() {
        let locks = Arc::new(LocalLocks::default());
        let guard = locks.lock("h", &Deadline::after(Duration::ZERO)).await.unwrap();

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                locks
                    .lock("h", &Deadline::after(Duration::from_secs(1)))
                    .await
                    .map(drop)
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unused_latches_are_dropped() {
        let locks = LocalLocks::default();
        let deadline = Deadline::after(Duration::ZERO);

        drop(locks.lock("a", &deadline).await.unwrap());
        drop(locks.lock("b", &deadline).await.unwrap());
        let _held = locks.lock("c", &deadline).await.unwrap();
        assert_eq!(locks.len(), 1);
    }
}
