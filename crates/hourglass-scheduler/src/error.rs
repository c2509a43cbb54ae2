use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Bad client input; nothing was written.
    #[error("Validation error: {0}")]
    Validation(String),

    /// No task with the given ID exists in the store.
    #[error("Task not found: {id}")]
    TaskNotFound { id: String },

    /// A conditional write lost its race. Expected under contention and never
    /// surfaced to HTTP clients.
    #[error("Conflict on task {id}: {reason}")]
    Conflict { id: String, reason: String },

    /// Underlying SQLite / rusqlite error (busy, I/O, corrupt row).
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] rusqlite::Error),

    /// The command did not finish before the execution deadline.
    #[error("Execution timed out after {ms}ms")]
    ExecutionTimeout { ms: u64 },

    /// The command could not be spawned or exited unsuccessfully.
    #[error("Execution failed: {0}")]
    ExecutionFailure(String),
}

impl SchedulerError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, SchedulerError::Conflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
