use std::sync::Arc;

use hourglass_core::{
    config::{RecoveryConfig, WorkerConfig},
    WorkerId,
};
use tokio::{sync::watch, task::JoinSet};
use tracing::{error, info};

use crate::{
    claim::ClaimEngine,
    clock::Clock,
    error::Result,
    executor::CommandRunner,
    recovery::RecoverySweep,
    store::TaskStore,
    supervisor::ExecutionSupervisor,
    worker::Worker,
};

/// Owns the worker loops and the recovery sweep for one process.
///
/// Every loop gets its own [`TaskStore`] handle on the shared database file,
/// so workers only contend through SQLite, exactly as workers in separate
/// processes would.
pub struct SchedulerEngine {
    workers: Vec<Worker>,
    sweep: RecoverySweep,
}

impl SchedulerEngine {
    pub fn new(workers: Vec<Worker>, sweep: RecoverySweep) -> Self {
        Self { workers, sweep }
    }

    /// Open `worker.count` workers plus one sweep against `db_path`.
    pub fn open(
        db_path: &str,
        worker: &WorkerConfig,
        recovery: &RecoveryConfig,
        runner: Arc<dyn CommandRunner>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let mut workers = Vec::with_capacity(worker.count);
        for index in 0..worker.count {
            let store = Arc::new(TaskStore::open(db_path, Arc::clone(&clock))?);
            let claims = ClaimEngine::new(
                Arc::clone(&store),
                WorkerId::for_process(index),
                worker.poll_interval(),
            );
            let supervisor = ExecutionSupervisor::new(store, Arc::clone(&runner), worker);
            workers.push(Worker::new(claims, supervisor));
        }

        let sweep_store = Arc::new(TaskStore::open(db_path, clock)?);
        let sweep = RecoverySweep::new(sweep_store, recovery);

        info!(
            db = %db_path,
            workers = workers.len(),
            runner = runner.name(),
            "scheduler engine ready"
        );
        Ok(Self::new(workers, sweep))
    }

    /// Run every loop until `shutdown` flips to `true`, then wait for
    /// in-flight tasks to finish.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        info!("scheduler engine started");

        let mut loops = JoinSet::new();
        for worker in self.workers {
            loops.spawn(worker.run(shutdown.clone()));
        }
        loops.spawn(self.sweep.run(shutdown));

        while let Some(res) = loops.join_next().await {
            if let Err(e) = res {
                error!("scheduler loop terminated abnormally: {e}");
            }
        }
        info!("scheduler engine stopped");
    }
}
