use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SubsecRound, Utc};
use hourglass_core::{TaskId, WorkerId};
use rusqlite::{params, types::Type, Connection, OptionalExtension};
use tracing::{debug, info, instrument, warn};

use crate::{
    clock::Clock,
    db,
    error::{Result, SchedulerError},
    types::{fmt_ts, parse_ts, ClaimOutcome, ClaimedTask, Lease, Orphan, Task, Transition},
};

/// Upper bound on lost claim races absorbed by a single `claim_next_due` call.
/// Past this the worker yields until its next poll.
const MAX_CLAIM_ATTEMPTS: usize = 64;

const TASK_COLUMNS: &str = "id, command, scheduled_at, picked_at, started_at, completed_at,
     failed_at, worker_id, reclaims, created_at, updated_at";

/// Durable task persistence and the single source of truth for task state.
///
/// Each handle owns one SQLite connection. Open one handle per worker (and
/// one for the HTTP surface) on the same database file; cross-handle safety
/// comes entirely from the conditional `UPDATE`s below, never from the
/// in-process mutex, which is held for one statement at a time.
pub struct TaskStore {
    db: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl TaskStore {
    /// Wrap an already-open connection, initialising the schema if needed.
    pub fn new(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self> {
        db::init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
            clock,
        })
    }

    /// Open (or create) the database file at `path`.
    pub fn open(path: &str, clock: Arc<dyn Clock>) -> Result<Self> {
        let conn = Connection::open(path)?;
        db::configure(&conn)?;
        Self::new(conn, clock)
    }

    /// Private in-memory database; only useful for single-handle tests.
    pub fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self> {
        Self::new(Connection::open_in_memory()?, clock)
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Insert a new task in state `scheduled`.
    ///
    /// `scheduled_at` must lie strictly after the store clock's current time;
    /// it is stored truncated to whole seconds. A sub-second lead can thus
    /// store a time at or just before `now`, which only makes the task due.
    #[instrument(skip(self, command), fields(command_len = command.len()))]
    pub fn create(&self, command: &str, scheduled_at: DateTime<Utc>) -> Result<Task> {
        if command.trim().is_empty() {
            return Err(SchedulerError::Validation("command cannot be empty".into()));
        }
        let now = self.clock.now();
        if scheduled_at <= now {
            return Err(SchedulerError::Validation(
                "scheduled_at must be in the future".into(),
            ));
        }
        let scheduled_at = scheduled_at.trunc_subsecs(0);

        let id = TaskId::new();
        let now_str = fmt_ts(now);
        let db = self.conn();
        db.execute(
            "INSERT INTO tasks
             (id, command, scheduled_at, picked_at, started_at, completed_at, failed_at,
              worker_id, reclaims, created_at, updated_at)
             VALUES (?1, ?2, ?3, NULL, NULL, NULL, NULL, NULL, 0, ?4, ?4)",
            params![id.as_str(), command, fmt_ts(scheduled_at), now_str],
        )?;
        info!(task_id = %id, scheduled_at = %scheduled_at, "task created");

        Ok(Task {
            id,
            command: command.to_string(),
            scheduled_at,
            picked_at: None,
            started_at: None,
            completed_at: None,
            failed_at: None,
            worker_id: None,
            reclaims: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Fetch a task by id.
    #[instrument(skip(self, id), fields(task_id = %id))]
    pub fn get(&self, id: &TaskId) -> Result<Task> {
        let db = self.conn();
        db.query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
            [id.as_str()],
            row_to_task,
        )
        .optional()?
        .ok_or_else(|| SchedulerError::TaskNotFound { id: id.to_string() })
    }

    /// One compare-and-set claim attempt against the earliest due task.
    ///
    /// Candidates are ordered by `(scheduled_at, created_at, id)`. The claim
    /// only lands if `picked_at` is still NULL when the `UPDATE` runs;
    /// otherwise another worker got there first and the attempt reports
    /// [`ClaimOutcome::Conflict`].
    #[instrument(skip(self, worker_id), fields(worker_id = %worker_id))]
    pub fn try_claim(&self, worker_id: &WorkerId, now: DateTime<Utc>) -> Result<ClaimOutcome> {
        let now_str = fmt_ts(now);
        let db = self.conn();

        let candidate: Option<String> = db
            .prepare_cached(
                "SELECT id FROM tasks
                 WHERE picked_at IS NULL AND completed_at IS NULL AND failed_at IS NULL
                   AND scheduled_at <= ?1
                 ORDER BY scheduled_at, created_at, id
                 LIMIT 1",
            )?
            .query_row([&now_str], |row| row.get(0))
            .optional()?;

        let Some(id) = candidate else {
            return Ok(ClaimOutcome::NoneAvailable);
        };

        let claimed = db
            .prepare_cached(&format!(
                "UPDATE tasks SET picked_at = ?2, worker_id = ?3, updated_at = ?2
                 WHERE id = ?1
                   AND picked_at IS NULL AND completed_at IS NULL AND failed_at IS NULL
                 RETURNING {TASK_COLUMNS}"
            ))?
            .query_row(params![id, now_str, worker_id.as_str()], row_to_task)
            .optional()?;

        match claimed {
            Some(task) => {
                let lease = Lease {
                    task_id: task.id.clone(),
                    worker_id: worker_id.clone(),
                    generation: task.reclaims,
                };
                Ok(ClaimOutcome::Claimed(ClaimedTask { task, lease }))
            }
            None => Ok(ClaimOutcome::Conflict(TaskId::from(id))),
        }
    }

    /// Claim the next due task, absorbing lost races.
    ///
    /// Returns `Ok(None)` when nothing is due (or when contention persisted
    /// for `MAX_CLAIM_ATTEMPTS` rounds; the next poll picks up from there).
    pub fn claim_next_due(
        &self,
        worker_id: &WorkerId,
        now: DateTime<Utc>,
    ) -> Result<Option<ClaimedTask>> {
        for _ in 0..MAX_CLAIM_ATTEMPTS {
            match self.try_claim(worker_id, now)? {
                ClaimOutcome::Claimed(claimed) => {
                    info!(
                        task_id = %claimed.task.id,
                        worker_id = %worker_id,
                        generation = claimed.lease.generation,
                        "task claimed"
                    );
                    return Ok(Some(claimed));
                }
                ClaimOutcome::NoneAvailable => return Ok(None),
                ClaimOutcome::Conflict(task_id) => {
                    debug!(task_id = %task_id, worker_id = %worker_id, "lost claim race, retrying");
                }
            }
        }
        warn!(worker_id = %worker_id, "claim contention persisted; deferring to next poll");
        Ok(None)
    }

    /// Apply a supervisor transition conditioned on `lease`.
    ///
    /// The written timestamp is never earlier than the preceding one, so a
    /// worker whose clock runs behind cannot break `picked_at ≤ started_at ≤
    /// terminal`. Returns `Conflict` if the row no longer matches the lease or
    /// the transition is not legal from the current state.
    #[instrument(skip(self, lease), fields(task_id = %lease.task_id))]
    pub fn advance(&self, lease: &Lease, transition: Transition, at: DateTime<Utc>) -> Result<()> {
        let sql = match transition {
            Transition::Start => {
                "UPDATE tasks SET started_at = MAX(?4, picked_at), updated_at = ?4
                 WHERE id = ?1 AND worker_id = ?2 AND reclaims = ?3
                   AND picked_at IS NOT NULL AND started_at IS NULL
                   AND completed_at IS NULL AND failed_at IS NULL"
            }
            Transition::Complete => {
                "UPDATE tasks SET completed_at = MAX(?4, started_at), updated_at = ?4
                 WHERE id = ?1 AND worker_id = ?2 AND reclaims = ?3
                   AND started_at IS NOT NULL
                   AND completed_at IS NULL AND failed_at IS NULL"
            }
            Transition::Fail => {
                "UPDATE tasks SET failed_at = MAX(?4, started_at), updated_at = ?4
                 WHERE id = ?1 AND worker_id = ?2 AND reclaims = ?3
                   AND started_at IS NOT NULL
                   AND completed_at IS NULL AND failed_at IS NULL"
            }
        };

        let db = self.conn();
        let n = db.prepare_cached(sql)?.execute(params![
            lease.task_id.as_str(),
            lease.worker_id.as_str(),
            lease.generation,
            fmt_ts(at),
        ])?;
        if n == 0 {
            return Err(SchedulerError::Conflict {
                id: lease.task_id.to_string(),
                reason: format!("lease no longer valid for {transition}"),
            });
        }
        Ok(())
    }

    /// Claimed tasks with no terminal timestamp whose latest pick/start
    /// happened before `cutoff`.
    pub fn list_orphans(&self, cutoff: DateTime<Utc>) -> Result<Vec<Orphan>> {
        let db = self.conn();
        let mut stmt = db.prepare_cached(
            "SELECT id, worker_id, reclaims FROM tasks
             WHERE picked_at IS NOT NULL AND completed_at IS NULL AND failed_at IS NULL
               AND COALESCE(started_at, picked_at) < ?1
             ORDER BY picked_at, id",
        )?;
        let rows = stmt.query_map([fmt_ts(cutoff)], |row| {
            Ok(Orphan {
                task_id: TaskId::from(row.get::<_, String>(0)?),
                worker_id: row.get::<_, Option<String>>(1)?.map(WorkerId),
                generation: row.get(2)?,
            })
        })?;
        let orphans = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(orphans)
    }

    /// Return an orphan to the claimable state and bump its claim generation.
    ///
    /// Conditioned on the generation and on the task still being stale, so a
    /// task that started or finished after it was listed is left alone.
    pub fn requeue_orphan(
        &self,
        orphan: &Orphan,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.resolve_orphan(
            orphan,
            "UPDATE tasks
             SET picked_at = NULL, started_at = NULL, worker_id = NULL,
                 reclaims = reclaims + 1, updated_at = ?3
             WHERE id = ?1 AND reclaims = ?2
               AND picked_at IS NOT NULL AND completed_at IS NULL AND failed_at IS NULL
               AND COALESCE(started_at, picked_at) < ?4",
            cutoff,
            now,
        )
    }

    /// Mark an orphan permanently failed (its requeue budget is spent).
    pub fn fail_orphan(
        &self,
        orphan: &Orphan,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.resolve_orphan(
            orphan,
            "UPDATE tasks
             SET failed_at = MAX(?3, COALESCE(started_at, picked_at)), updated_at = ?3
             WHERE id = ?1 AND reclaims = ?2
               AND picked_at IS NOT NULL AND completed_at IS NULL AND failed_at IS NULL
               AND COALESCE(started_at, picked_at) < ?4",
            cutoff,
            now,
        )
    }

    // --- private helpers ---------------------------------------------------

    fn resolve_orphan(
        &self,
        orphan: &Orphan,
        sql: &str,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let db = self.conn();
        let n = db.prepare_cached(sql)?.execute(params![
            orphan.task_id.as_str(),
            orphan.generation,
            fmt_ts(now),
            fmt_ts(cutoff),
        ])?;
        if n == 0 {
            return Err(SchedulerError::Conflict {
                id: orphan.task_id.to_string(),
                reason: "task changed since it was found orphaned".into(),
            });
        }
        Ok(())
    }

    /// A panic while holding the lock cannot leave a half-applied statement
    /// behind, so a poisoned mutex is safe to reuse.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Map a SQLite row (in `TASK_COLUMNS` order) to a `Task`.
fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: TaskId::from(row.get::<_, String>(0)?),
        command: row.get(1)?,
        scheduled_at: ts_column(row, 2)?,
        picked_at: opt_ts_column(row, 3)?,
        started_at: opt_ts_column(row, 4)?,
        completed_at: opt_ts_column(row, 5)?,
        failed_at: opt_ts_column(row, 6)?,
        worker_id: row.get::<_, Option<String>>(7)?.map(WorkerId),
        reclaims: row.get(8)?,
        created_at: ts_column(row, 9)?,
        updated_at: ts_column(row, 10)?,
    })
}

fn ts_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_ts_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => parse_ts(&raw).map(Some).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
        }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::clock::ManualClock;
    use crate::types::TaskState;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap()
    }

    fn setup() -> (Arc<ManualClock>, TaskStore) {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = TaskStore::open_in_memory(clock.clone()).unwrap();
        (clock, store)
    }

    fn count(store: &TaskStore) -> i64 {
        store
            .conn()
            .query_row("SELECT COUNT(*) FROM tasks", [], |r| r.get(0))
            .unwrap()
    }

    fn worker(name: &str) -> WorkerId {
        WorkerId::from(name)
    }

    #[test]
    fn create_then_get_is_scheduled_with_nothing_else_set() {
        let (_clock, store) = setup();
        let created = store.create("echo hi", t0() + Duration::seconds(60)).unwrap();
        let task = store.get(&created.id).unwrap();
        assert_eq!(task.state(), TaskState::Scheduled);
        assert_eq!(task.command, "echo hi");
        assert_eq!(task.scheduled_at, t0() + Duration::seconds(60));
        assert!(task.picked_at.is_none());
        assert!(task.started_at.is_none());
        assert!(task.completed_at.is_none());
        assert!(task.failed_at.is_none());
        assert_eq!(task.created_at, t0());
    }

    #[test]
    fn past_or_present_schedule_is_rejected_without_a_row() {
        let (_clock, store) = setup();
        for at in [t0(), t0() - Duration::seconds(1)] {
            let err = store.create("echo hi", at).unwrap_err();
            assert!(matches!(err, SchedulerError::Validation(_)));
        }
        assert_eq!(count(&store), 0);
    }

    #[test]
    fn sub_second_future_is_accepted_and_immediately_due() {
        let (_clock, store) = setup();
        let task = store
            .create("echo hi", t0() + Duration::milliseconds(400))
            .unwrap();
        assert_eq!(task.scheduled_at, t0());

        let claimed = store.claim_next_due(&worker("w1"), t0()).unwrap().unwrap();
        assert_eq!(claimed.task.id, task.id);
        assert!(claimed.task.picked_at >= Some(claimed.task.scheduled_at));
    }

    #[test]
    fn scheduled_at_is_truncated_to_seconds() {
        let (_clock, store) = setup();
        let task = store
            .create("true", t0() + Duration::milliseconds(2_750))
            .unwrap();
        assert_eq!(task.scheduled_at, t0() + Duration::seconds(2));
    }

    #[test]
    fn blank_command_is_rejected() {
        let (_clock, store) = setup();
        for cmd in ["", "   "] {
            let err = store.create(cmd, t0() + Duration::seconds(5)).unwrap_err();
            assert!(matches!(err, SchedulerError::Validation(_)));
        }
        assert_eq!(count(&store), 0);
    }

    #[test]
    fn unknown_id_is_not_found() {
        let (_clock, store) = setup();
        let err = store.get(&TaskId::from("nope")).unwrap_err();
        assert!(matches!(err, SchedulerError::TaskNotFound { .. }));
    }

    #[test]
    fn nothing_is_claimed_before_it_is_due() {
        let (_clock, store) = setup();
        store.create("true", t0() + Duration::seconds(60)).unwrap();
        let outcome = store
            .try_claim(&worker("w1"), t0() + Duration::seconds(59))
            .unwrap();
        assert!(matches!(outcome, ClaimOutcome::NoneAvailable));
    }

    #[test]
    fn due_task_is_claimed_once() {
        let (_clock, store) = setup();
        let created = store.create("true", t0() + Duration::seconds(60)).unwrap();
        let now = t0() + Duration::seconds(60);

        let claimed = store.claim_next_due(&worker("w1"), now).unwrap().unwrap();
        assert_eq!(claimed.task.id, created.id);
        assert_eq!(claimed.task.picked_at, Some(now));
        assert_eq!(claimed.task.worker_id, Some(worker("w1")));
        assert_eq!(claimed.lease.generation, 0);

        assert!(store.claim_next_due(&worker("w2"), now).unwrap().is_none());
        assert_eq!(store.get(&created.id).unwrap().state(), TaskState::Picked);
    }

    #[test]
    fn claim_order_is_scheduled_then_created_then_id() {
        let (clock, store) = setup();
        let late = store.create("late", t0() + Duration::seconds(30)).unwrap();
        clock.advance(Duration::seconds(1));
        let early_second = store.create("b", t0() + Duration::seconds(10)).unwrap();
        clock.set(t0());
        let early_first = store.create("a", t0() + Duration::seconds(10)).unwrap();

        let now = t0() + Duration::seconds(31);
        let order: Vec<TaskId> = std::iter::from_fn(|| {
            store
                .claim_next_due(&worker("w"), now)
                .unwrap()
                .map(|c| c.task.id)
        })
        .collect();
        assert_eq!(order, vec![early_first.id, early_second.id, late.id]);
    }

    #[test]
    fn racing_workers_claim_a_task_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("race.db");
        let path = path.to_str().unwrap().to_string();
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(t0()));

        let seed = TaskStore::open(&path, clock.clone()).unwrap();
        seed.create("true", t0() + Duration::seconds(1)).unwrap();

        const WORKERS: usize = 8;
        let stores: Vec<TaskStore> = (0..WORKERS)
            .map(|_| TaskStore::open(&path, clock.clone()).unwrap())
            .collect();
        let barrier = Arc::new(Barrier::new(WORKERS));
        let now = t0() + Duration::seconds(5);

        let handles: Vec<_> = stores
            .into_iter()
            .enumerate()
            .map(|(i, store)| {
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    store
                        .claim_next_due(&WorkerId::for_process(i), now)
                        .unwrap()
                        .is_some()
                })
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }

    #[test]
    fn racing_workers_split_many_tasks_without_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("split.db");
        let path = path.to_str().unwrap().to_string();
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(t0()));

        let seed = TaskStore::open(&path, clock.clone()).unwrap();
        for i in 0..40 {
            seed.create(&format!("echo {i}"), t0() + Duration::seconds(1))
                .unwrap();
        }

        let now = t0() + Duration::seconds(5);
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = TaskStore::open(&path, clock.clone()).unwrap();
                std::thread::spawn(move || {
                    let me = WorkerId::for_process(i);
                    let mut mine = Vec::new();
                    while let Some(c) = store.claim_next_due(&me, now).unwrap() {
                        mine.push(c.task.id);
                    }
                    mine
                })
            })
            .collect();

        let mut all: Vec<TaskId> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(total, 40);
        assert_eq!(all.len(), 40);
    }

    #[test]
    fn transitions_are_monotonic_even_with_a_lagging_clock() {
        let (_clock, store) = setup();
        let created = store.create("true", t0() + Duration::seconds(10)).unwrap();
        let picked = t0() + Duration::seconds(20);
        let claimed = store.claim_next_due(&worker("w"), picked).unwrap().unwrap();

        // Worker clock is 5s behind the one that claimed.
        store
            .advance(&claimed.lease, Transition::Start, picked - Duration::seconds(5))
            .unwrap();
        store
            .advance(&claimed.lease, Transition::Complete, picked - Duration::seconds(4))
            .unwrap();

        let task = store.get(&created.id).unwrap();
        let started = task.started_at.unwrap();
        let completed = task.completed_at.unwrap();
        assert!(task.scheduled_at <= picked);
        assert!(picked <= started);
        assert!(started <= completed);
        assert!(task.failed_at.is_none());
        assert_eq!(task.state(), TaskState::Completed);
    }

    #[test]
    fn terminal_states_are_mutually_exclusive_and_final() {
        let (_clock, store) = setup();
        store.create("true", t0() + Duration::seconds(1)).unwrap();
        let now = t0() + Duration::seconds(2);
        let claimed = store.claim_next_due(&worker("w"), now).unwrap().unwrap();
        let lease = &claimed.lease;

        // Cannot finish before starting.
        assert!(store
            .advance(lease, Transition::Complete, now)
            .unwrap_err()
            .is_conflict());

        store.advance(lease, Transition::Start, now).unwrap();
        assert!(store
            .advance(lease, Transition::Start, now)
            .unwrap_err()
            .is_conflict());
        store.advance(lease, Transition::Fail, now).unwrap();
        assert!(store
            .advance(lease, Transition::Complete, now)
            .unwrap_err()
            .is_conflict());
        assert!(store
            .advance(lease, Transition::Fail, now)
            .unwrap_err()
            .is_conflict());

        let task = store.get(&lease.task_id).unwrap();
        assert!(task.failed_at.is_some());
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn foreign_lease_cannot_advance() {
        let (_clock, store) = setup();
        store.create("true", t0() + Duration::seconds(1)).unwrap();
        let now = t0() + Duration::seconds(2);
        let claimed = store.claim_next_due(&worker("w1"), now).unwrap().unwrap();

        let impostor = Lease {
            worker_id: worker("w2"),
            ..claimed.lease.clone()
        };
        assert!(store
            .advance(&impostor, Transition::Start, now)
            .unwrap_err()
            .is_conflict());

        let stale_generation = Lease {
            generation: 1,
            ..claimed.lease.clone()
        };
        assert!(store
            .advance(&stale_generation, Transition::Start, now)
            .unwrap_err()
            .is_conflict());
    }

    #[test]
    fn orphan_requeue_happens_once_and_revokes_the_old_lease() {
        let (_clock, store) = setup();
        let created = store.create("true", t0() + Duration::seconds(1)).unwrap();
        let picked = t0() + Duration::seconds(2);
        let claimed = store.claim_next_due(&worker("w1"), picked).unwrap().unwrap();

        let now = picked + Duration::seconds(120);
        let cutoff = now - Duration::seconds(60);
        let orphans = store.list_orphans(cutoff).unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].task_id, created.id);
        assert_eq!(orphans[0].worker_id, Some(worker("w1")));

        store.requeue_orphan(&orphans[0], cutoff, now).unwrap();
        assert!(store
            .requeue_orphan(&orphans[0], cutoff, now)
            .unwrap_err()
            .is_conflict());

        let task = store.get(&created.id).unwrap();
        assert_eq!(task.state(), TaskState::Scheduled);
        assert_eq!(task.reclaims, 1);
        assert!(task.worker_id.is_none());

        // The crashed worker's lease is dead.
        assert!(store
            .advance(&claimed.lease, Transition::Start, now)
            .unwrap_err()
            .is_conflict());

        let again = store.claim_next_due(&worker("w2"), now).unwrap().unwrap();
        assert_eq!(again.task.id, created.id);
        assert_eq!(again.lease.generation, 1);
    }

    #[test]
    fn recently_started_task_is_not_orphaned() {
        let (_clock, store) = setup();
        store.create("true", t0() + Duration::seconds(1)).unwrap();
        let picked = t0() + Duration::seconds(2);
        let claimed = store.claim_next_due(&worker("w1"), picked).unwrap().unwrap();
        let started = picked + Duration::seconds(100);
        store
            .advance(&claimed.lease, Transition::Start, started)
            .unwrap();

        let cutoff = picked + Duration::seconds(50);
        assert!(store.list_orphans(cutoff).unwrap().is_empty());
    }

    #[test]
    fn failing_an_orphan_sets_failed_at() {
        let (_clock, store) = setup();
        let created = store.create("true", t0() + Duration::seconds(1)).unwrap();
        let picked = t0() + Duration::seconds(2);
        store.claim_next_due(&worker("w1"), picked).unwrap().unwrap();

        let now = picked + Duration::seconds(300);
        let cutoff = now - Duration::seconds(60);
        let orphan = store.list_orphans(cutoff).unwrap().remove(0);
        store.fail_orphan(&orphan, cutoff, now).unwrap();

        let task = store.get(&created.id).unwrap();
        assert_eq!(task.state(), TaskState::Failed);
        assert_eq!(task.failed_at, Some(now));
        assert!(store.list_orphans(cutoff).unwrap().is_empty());
    }
}
