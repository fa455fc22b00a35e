//! Membership monitor.
//!
//! Listens to the cluster membership feed and records departed members in
//! the shared down-members set, from which the protocol reclaims their locks.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::member::MembershipEvent;
use crate::store::ClusterStore;

/// Background task feeding member departures into the down-members set.
///
/// Dropping the monitor stops the task.
pub struct MembershipMonitor {
    task: tokio::task::JoinHandle<()>,
}

impl MembershipMonitor {
    /// Subscribes to `store`'s membership feed and starts the listener.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<S: ClusterStore>(store: Arc<S>) -> Self {
        let mut events = store.subscribe_membership();

        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(MembershipEvent::MemberRemoved(member)) => {
                        match store.mark_member_down(&member).await {
                            Ok(()) => info!(member = %member, "cluster member marked down"),
                            Err(e) => {
                                warn!(member = %member, error = %e, "failed to mark member down")
                            }
                        }
                    }
                    Ok(MembershipEvent::MemberAdded(_)) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "membership feed lagged; departures may have been missed");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Self { task }
    }

    /// Returns false once the membership feed has closed.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for MembershipMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}
