//! The per-handle pair of access mutexes.
//!
//! Every read/modify/write of a handle's records happens under these. The
//! write-access mutex is always taken before the read-access mutex; callers
//! only ever go through [`AccessPair`], which fixes that order.

use lock_manager_core::error::{LockError, LockResult};
use lock_manager_core::timeout::Deadline;
use tracing::warn;

use crate::store::{AccessKind, ClusterStore};

/// The `write-access` / `read-access` mutexes of one handle.
pub(crate) struct AccessPair<'a, S> {
    store: &'a S,
    handle: &'a str,
}

impl<'a, S: ClusterStore> AccessPair<'a, S> {
    pub(crate) fn new(store: &'a S, handle: &'a str) -> Self {
        Self { store, handle }
    }

    /// Takes the write-access mutex only, before `deadline` runs out.
    pub(crate) async fn lock_write_access(&self, deadline: &Deadline) -> LockResult<()> {
        if self
            .store
            .try_lock_access(AccessKind::Write, self.handle, deadline.remaining())
            .await?
        {
            Ok(())
        } else {
            Err(LockError::Timeout(deadline.budget()))
        }
    }

    /// Takes write-access then read-access, both before `deadline` runs out.
    ///
    /// If read-access cannot be had, the write-access hold just taken is
    /// dropped again before the timeout is reported.
    pub(crate) async fn lock_both(&self, deadline: &Deadline) -> LockResult<()> {
        self.lock_write_access(deadline).await?;

        match self
            .store
            .try_lock_access(AccessKind::Read, self.handle, deadline.remaining())
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => {
                self.release(AccessKind::Write).await;
                Err(LockError::Timeout(deadline.budget()))
            }
            Err(e) => {
                self.release(AccessKind::Write).await;
                Err(e)
            }
        }
    }

    /// Drops the write-access hold taken by [`lock_write_access`](Self::lock_write_access).
    pub(crate) async fn release_write_access(&self) {
        self.release(AccessKind::Write).await;
    }

    /// Drops the holds taken by [`lock_both`](Self::lock_both), read side first.
    pub(crate) async fn release_both(&self) {
        self.release(AccessKind::Read).await;
        self.release(AccessKind::Write).await;
    }

    /// Clears both mutexes regardless of hold count.
    ///
    /// Used when a lock is given up for good (unlock, downgrade), which must
    /// also drop the holds kept since the original write request.
    pub(crate) async fn force_release_both(&self) {
        for kind in [AccessKind::Read, AccessKind::Write] {
            if let Err(e) = self.store.force_unlock_access(kind, self.handle).await {
                warn!(lock.handle = %self.handle, access = %kind, error = %e, "failed to force-release access mutex");
            }
        }
    }

    async fn release(&self, kind: AccessKind) {
        if let Err(e) = self.store.unlock_access(kind, self.handle).await {
            warn!(lock.handle = %self.handle, access = %kind, error = %e, "failed to release access mutex");
        }
    }
}
