use std::{sync::Arc, time::Duration};

use hourglass_core::config::RecoveryConfig;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{error::Result, store::TaskStore};

/// Counts from one sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub requeued: usize,
    pub failed: usize,
    /// Orphans that changed between listing and resolution (started,
    /// finished, or swept by another process).
    pub skipped: usize,
}

/// Periodically returns abandoned tasks to the queue.
///
/// A task is orphaned when it is claimed, has no terminal timestamp, and its
/// latest pick/start is older than `stale_after`. Orphans are requeued until
/// they have been requeued `max_reclaims` times, after which they are failed.
pub struct RecoverySweep {
    store: Arc<TaskStore>,
    stale_after: chrono::Duration,
    max_reclaims: u32,
    interval: Duration,
}

impl RecoverySweep {
    pub fn new(store: Arc<TaskStore>, config: &RecoveryConfig) -> Self {
        Self {
            store,
            // Saturate: an unrepresentable threshold means nothing is ever stale.
            stale_after: chrono::Duration::from_std(config.stale_after())
                .unwrap_or(chrono::TimeDelta::MAX),
            max_reclaims: config.max_reclaims,
            interval: config.sweep_interval(),
        }
    }

    /// Run one pass over the orphans visible right now.
    pub fn sweep_once(&self) -> Result<SweepReport> {
        let now = self.store.clock().now();
        let mut report = SweepReport::default();
        let Some(cutoff) = now.checked_sub_signed(self.stale_after) else {
            return Ok(report);
        };

        for orphan in self.store.list_orphans(cutoff)? {
            let requeue = orphan.generation < self.max_reclaims;
            let res = if requeue {
                self.store.requeue_orphan(&orphan, cutoff, now)
            } else {
                self.store.fail_orphan(&orphan, cutoff, now)
            };
            match res {
                Ok(()) if requeue => {
                    warn!(
                        task_id = %orphan.task_id,
                        worker_id = ?orphan.worker_id,
                        reclaims = orphan.generation + 1,
                        "orphaned task requeued"
                    );
                    report.requeued += 1;
                }
                Ok(()) => {
                    error!(
                        task_id = %orphan.task_id,
                        worker_id = ?orphan.worker_id,
                        reclaims = orphan.generation,
                        "orphaned task failed: reclaim limit reached"
                    );
                    report.failed += 1;
                }
                Err(e) if e.is_conflict() => {
                    debug!(task_id = %orphan.task_id, "orphan changed before it was resolved");
                    report.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    /// Sweep on every interval tick until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "recovery sweep started");

        let mut interval = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.sweep_once() {
                        Ok(report) if report.requeued + report.failed > 0 => {
                            info!(requeued = report.requeued, failed = report.failed, "sweep finished");
                        }
                        Ok(_) => {}
                        Err(e) => error!("recovery sweep error: {e}"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("recovery sweep shutting down");
                        break;
                    }
                }
            }
        }
    }
}
