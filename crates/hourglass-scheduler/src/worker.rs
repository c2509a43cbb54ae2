use tokio::sync::watch;
use tracing::{error, info};

use crate::{
    claim::ClaimEngine,
    supervisor::{ExecutionSupervisor, TaskOutcome},
};

/// One claim → supervise loop. Runs at most one task at a time.
pub struct Worker {
    claims: ClaimEngine,
    supervisor: ExecutionSupervisor,
}

impl Worker {
    pub fn new(claims: ClaimEngine, supervisor: ExecutionSupervisor) -> Self {
        Self { claims, supervisor }
    }

    /// Loop until shutdown. A task already running when shutdown arrives is
    /// supervised to completion first.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let worker_id = self.claims.worker_id().clone();
        info!(worker_id = %worker_id, "worker started");

        while let Some(claimed) = self.claims.wait_next(&mut shutdown).await {
            let task_id = claimed.task.id.clone();
            match self.supervisor.supervise(claimed).await {
                Ok(TaskOutcome::Abandoned) => {
                    info!(worker_id = %worker_id, task_id = %task_id, "task abandoned");
                }
                Ok(_) => {}
                // Left in picked/started; the recovery sweep will requeue it.
                Err(e) => {
                    error!(worker_id = %worker_id, task_id = %task_id, error = %e, "supervision failed");
                }
            }
        }

        info!(worker_id = %worker_id, "worker stopped");
    }
}
