//! `hourglass-scheduler`: durable one-shot task scheduling on SQLite.
//!
//! # Overview
//!
//! Tasks are persisted to a SQLite `tasks` table by the [`store::TaskStore`].
//! Worker loops ([`worker::Worker`]) poll the store, claim due tasks with a
//! compare-and-set write ([`claim::ClaimEngine`]) and run them under the
//! [`supervisor::ExecutionSupervisor`]. A [`recovery::RecoverySweep`] requeues
//! tasks abandoned by crashed workers. [`engine::SchedulerEngine`] owns all of
//! the loops.
//!
//! # Lifecycle
//!
//! | State       | Set by                | Timestamp      |
//! |-------------|-----------------------|----------------|
//! | `scheduled` | `TaskStore::create`   | `scheduled_at` |
//! | `picked`    | `ClaimEngine`         | `picked_at`    |
//! | `started`   | `ExecutionSupervisor` | `started_at`   |
//! | `completed` | `ExecutionSupervisor` | `completed_at` |
//! | `failed`    | supervisor or sweep   | `failed_at`    |

pub mod claim;
pub mod clock;
pub mod db;
pub mod engine;
pub mod error;
pub mod executor;
pub mod recovery;
pub mod status;
pub mod store;
pub mod supervisor;
pub mod truncate;
pub mod types;
pub mod worker;

pub use claim::ClaimEngine;
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::SchedulerEngine;
pub use error::{Result, SchedulerError};
pub use executor::{CommandRunner, ExecOutput, ShellRunner};
pub use recovery::{RecoverySweep, SweepReport};
pub use status::{StatusService, TaskStatus};
pub use store::TaskStore;
pub use supervisor::{ExecutionSupervisor, TaskOutcome};
pub use types::{ClaimOutcome, ClaimedTask, Lease, Task, TaskState, Transition};
