use chrono::{DateTime, SecondsFormat, Utc};
use hourglass_core::{TaskId, WorkerId};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a task, derived from which timestamps are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for `scheduled_at`, or due but not yet claimed.
    Scheduled,
    /// Claimed by a worker, command not yet invoked.
    Picked,
    /// Command running.
    Started,
    /// Command exited successfully.
    Completed,
    /// Command failed, timed out, or the task was abandoned too many times.
    Failed,
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Scheduled => "scheduled",
            TaskState::Picked => "picked",
            TaskState::Started => "started",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

/// A persisted task record. Unset timestamps are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub command: String,
    pub scheduled_at: DateTime<Utc>,
    pub picked_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    /// Holder of the current claim; cleared when the task is requeued.
    pub worker_id: Option<WorkerId>,
    /// How many times the recovery sweep has requeued this task.
    pub reclaims: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn state(&self) -> TaskState {
        if self.completed_at.is_some() {
            TaskState::Completed
        } else if self.failed_at.is_some() {
            TaskState::Failed
        } else if self.started_at.is_some() {
            TaskState::Started
        } else if self.picked_at.is_some() {
            TaskState::Picked
        } else {
            TaskState::Scheduled
        }
    }
}

/// Proof of a claim. Every supervisor write is conditioned on all three
/// fields still matching the row, so a worker whose claim was revoked by the
/// recovery sweep can no longer change the task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub task_id: TaskId,
    pub worker_id: WorkerId,
    /// Claim generation (`tasks.reclaims`) at claim time.
    pub generation: u32,
}

/// A task freshly claimed by a worker.
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub task: Task,
    pub lease: Lease,
}

/// Result of one conditional claim attempt.
#[derive(Debug)]
pub enum ClaimOutcome {
    /// The compare-and-set won; the task now belongs to this worker.
    Claimed(ClaimedTask),
    /// No unclaimed task is due.
    NoneAvailable,
    /// A candidate was found but another worker claimed it first.
    Conflict(TaskId),
}

/// Supervisor-driven transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// `picked → started`
    Start,
    /// `started → completed`
    Complete,
    /// `started → failed`
    Fail,
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Transition::Start => "start",
            Transition::Complete => "complete",
            Transition::Fail => "fail",
        };
        write!(f, "{s}")
    }
}

/// A claimed, non-terminal task whose pick/start is older than the staleness
/// cutoff, as seen by the recovery sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Orphan {
    pub task_id: TaskId,
    pub worker_id: Option<WorkerId>,
    pub generation: u32,
}

/// Format a timestamp the way it is stored: fixed-width, microsecond
/// precision, `Z` suffix. Fixed width keeps SQL string order chronological.
pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}
