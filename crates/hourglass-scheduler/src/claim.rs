use std::{sync::Arc, time::Duration};

use hourglass_core::WorkerId;
use tokio::sync::watch;
use tracing::error;

use crate::{error::Result, store::TaskStore, types::ClaimedTask};

/// Periodic claiming of due tasks on behalf of one worker.
pub struct ClaimEngine {
    store: Arc<TaskStore>,
    worker_id: WorkerId,
    poll_interval: Duration,
}

impl ClaimEngine {
    pub fn new(store: Arc<TaskStore>, worker_id: WorkerId, poll_interval: Duration) -> Self {
        Self {
            store,
            worker_id,
            poll_interval,
        }
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Claim the earliest due task right now, if there is one.
    pub fn next(&self) -> Result<Option<ClaimedTask>> {
        let now = self.store.clock().now();
        self.store.claim_next_due(&self.worker_id, now)
    }

    /// Poll until a task is claimed or shutdown is signalled.
    ///
    /// Tries immediately, then once per poll interval while idle. Store
    /// errors are logged and retried on the next poll. Returns `None` on
    /// shutdown.
    pub async fn wait_next(&self, shutdown: &mut watch::Receiver<bool>) -> Option<ClaimedTask> {
        loop {
            if *shutdown.borrow() {
                return None;
            }
            match self.next() {
                Ok(Some(claimed)) => return Some(claimed),
                Ok(None) => {}
                Err(e) => error!(worker_id = %self.worker_id, error = %e, "claim attempt failed"),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return None;
                    }
                }
            }
        }
    }
}
