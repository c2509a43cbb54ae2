use std::{sync::Arc, time::Duration};

use hourglass_core::config::WorkerConfig;
use tracing::{debug, info, warn};

use crate::{
    error::{Result, SchedulerError},
    executor::CommandRunner,
    store::TaskStore,
    truncate::tail_excerpt,
    types::{ClaimedTask, Lease, Transition},
};

/// What happened to a claimed task.
#[derive(Debug)]
pub enum TaskOutcome {
    /// `completed_at` was recorded.
    Completed,
    /// `failed_at` was recorded; `error` is `ExecutionTimeout` or
    /// `ExecutionFailure`.
    Failed { error: SchedulerError },
    /// The claim was revoked (by the recovery sweep) before this supervisor
    /// could record its transition; the row was left untouched.
    Abandoned,
}

/// Runs claimed tasks and records `started` and exactly one terminal state.
pub struct ExecutionSupervisor {
    store: Arc<TaskStore>,
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
    max_output_chars: usize,
}

impl ExecutionSupervisor {
    pub fn new(store: Arc<TaskStore>, runner: Arc<dyn CommandRunner>, config: &WorkerConfig) -> Self {
        Self {
            store,
            runner,
            timeout: config.execution_timeout(),
            max_output_chars: config.max_output_chars,
        }
    }

    /// Override the execution deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Drive `claimed` through `started → completed | failed`.
    ///
    /// Returns `Err` only for store failures; the task is then left in
    /// `picked`/`started` for the recovery sweep to pick up.
    pub async fn supervise(&self, claimed: ClaimedTask) -> Result<TaskOutcome> {
        let ClaimedTask { task, lease } = claimed;

        if !self.record(&lease, Transition::Start)? {
            return Ok(TaskOutcome::Abandoned);
        }
        info!(task_id = %task.id, runner = self.runner.name(), "task started");

        let run = tokio::time::timeout(self.timeout, self.runner.run(&task.command)).await;
        let result = match run {
            Ok(Ok(output)) if output.success() => {
                debug!(
                    task_id = %task.id,
                    stdout = %tail_excerpt(&output.stdout, self.max_output_chars),
                    "command output"
                );
                Ok(())
            }
            Ok(Ok(output)) => Err(SchedulerError::ExecutionFailure(format!(
                "exit code {}: {}",
                output.exit_code,
                tail_excerpt(&output.stderr, self.max_output_chars)
            ))),
            Ok(Err(e)) => Err(e),
            // The run future has been dropped at this point, which kills the child.
            Err(_elapsed) => Err(SchedulerError::ExecutionTimeout {
                ms: self.timeout.as_millis() as u64,
            }),
        };

        match result {
            Ok(()) => {
                if !self.record(&lease, Transition::Complete)? {
                    return Ok(TaskOutcome::Abandoned);
                }
                info!(task_id = %task.id, "task completed");
                Ok(TaskOutcome::Completed)
            }
            Err(error) => {
                if !self.record(&lease, Transition::Fail)? {
                    return Ok(TaskOutcome::Abandoned);
                }
                warn!(task_id = %task.id, error = %error, "task failed");
                Ok(TaskOutcome::Failed { error })
            }
        }
    }

    /// Apply `transition`; `Ok(false)` when the lease was revoked.
    fn record(&self, lease: &Lease, transition: Transition) -> Result<bool> {
        let now = self.store.clock().now();
        match self.store.advance(lease, transition, now) {
            Ok(()) => Ok(true),
            Err(e) if e.is_conflict() => {
                warn!(
                    task_id = %lease.task_id,
                    worker_id = %lease.worker_id,
                    %transition,
                    "claim revoked; leaving task to its new owner"
                );
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
