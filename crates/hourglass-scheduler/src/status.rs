use std::sync::Arc;

use chrono::{DateTime, Utc};
use hourglass_core::TaskId;
use serde::Serialize;

use crate::{
    error::Result,
    store::TaskStore,
    types::{Task, TaskState},
};

/// Read-only projection of a task for clients. Unset timestamps are omitted
/// when serialized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStatus {
    pub task_id: TaskId,
    pub command: String,
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
}

impl From<Task> for TaskStatus {
    fn from(task: Task) -> Self {
        let state = task.state();
        Self {
            task_id: task.id,
            command: task.command,
            state,
            scheduled_at: Some(task.scheduled_at),
            picked_at: task.picked_at,
            started_at: task.started_at,
            completed_at: task.completed_at,
            failed_at: task.failed_at,
        }
    }
}

pub struct StatusService {
    store: Arc<TaskStore>,
}

impl StatusService {
    pub fn new(store: Arc<TaskStore>) -> Self {
        Self { store }
    }

    /// Current snapshot of `id`; `TaskNotFound` if it does not exist.
    pub fn status(&self, id: &TaskId) -> Result<TaskStatus> {
        self.store.get(id).map(TaskStatus::from)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use hourglass_core::WorkerId;

    use super::*;
    use crate::{
        clock::{Clock, ManualClock},
        error::SchedulerError,
        types::Transition,
    };

    fn setup() -> (Arc<ManualClock>, Arc<TaskStore>, StatusService) {
        let t0 = Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(t0));
        let store = Arc::new(TaskStore::open_in_memory(clock.clone()).unwrap());
        let status = StatusService::new(Arc::clone(&store));
        (clock, store, status)
    }

    #[test]
    fn scheduled_task_omits_unset_timestamps() {
        let (clock, store, status) = setup();
        let task = store
            .create("echo hi", clock.now() + Duration::seconds(60))
            .unwrap();

        let json = serde_json::to_value(status.status(&task.id).unwrap()).unwrap();
        assert_eq!(json["task_id"], task.id.as_str());
        assert_eq!(json["command"], "echo hi");
        assert_eq!(json["state"], "scheduled");
        assert_eq!(json["scheduled_at"], "2026-05-01T08:01:00Z");
        let obj = json.as_object().unwrap();
        for absent in ["picked_at", "started_at", "completed_at", "failed_at"] {
            assert!(!obj.contains_key(absent), "{absent} should be omitted");
        }
    }

    #[test]
    fn status_tracks_lifecycle() {
        let (clock, store, status) = setup();
        let task = store
            .create("echo hi", clock.now() + Duration::seconds(60))
            .unwrap();
        clock.advance(Duration::seconds(60));
        let c = store
            .claim_next_due(&WorkerId::from("w1"), clock.now())
            .unwrap()
            .unwrap();
        assert_eq!(status.status(&task.id).unwrap().state, TaskState::Picked);

        store.advance(&c.lease, Transition::Start, clock.now()).unwrap();
        store.advance(&c.lease, Transition::Complete, clock.now()).unwrap();

        let s = status.status(&task.id).unwrap();
        assert_eq!(s.state, TaskState::Completed);
        assert!(s.picked_at.is_some() && s.started_at.is_some() && s.completed_at.is_some());
        assert!(s.failed_at.is_none());
    }

    #[test]
    fn unknown_id_is_not_found() {
        let (_clock, _store, status) = setup();
        let err = status.status(&TaskId::from("nope")).unwrap_err();
        assert!(matches!(err, SchedulerError::TaskNotFound { .. }));
    }
}
