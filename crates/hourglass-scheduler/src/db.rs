use std::time::Duration;

use rusqlite::Connection;

use crate::error::Result;

/// How long a connection waits on a locked database before reporting
/// `StoreUnavailable`.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `tasks` table (idempotent) and two partial indexes: one over
/// unclaimed rows, ordered exactly like the claim query, and one over
/// in-flight rows for the recovery sweep. Both stay small no matter how much
/// finished history accumulates.
///
/// Timestamps are fixed-width RFC 3339 UTC text (see [`crate::types::fmt_ts`]),
/// so string comparison in SQL is chronological comparison.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS tasks (
            id            TEXT    NOT NULL PRIMARY KEY,
            command       TEXT    NOT NULL,
            scheduled_at  TEXT    NOT NULL,
            picked_at     TEXT,               -- NULL until claimed
            started_at    TEXT,
            completed_at  TEXT,
            failed_at     TEXT,
            worker_id     TEXT,               -- holder of the current claim
            reclaims      INTEGER NOT NULL DEFAULT 0,
            created_at    TEXT    NOT NULL,
            updated_at    TEXT    NOT NULL,
            CHECK (completed_at IS NULL OR failed_at IS NULL)
        ) STRICT;

        -- Claim scan: WHERE picked_at IS NULL AND scheduled_at <= ? ORDER BY …
        CREATE INDEX IF NOT EXISTS idx_tasks_due
            ON tasks (scheduled_at, created_at, id)
            WHERE picked_at IS NULL;

        -- Recovery sweep: claimed rows with no terminal timestamp.
        CREATE INDEX IF NOT EXISTS idx_tasks_in_flight
            ON tasks (picked_at)
            WHERE picked_at IS NOT NULL AND completed_at IS NULL AND failed_at IS NULL;
        ",
    )?;
    Ok(())
}

/// Connection settings shared by every store handle on a database file.
pub fn configure(conn: &Connection) -> Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    // journal_mode returns a row, so it cannot go through execute_batch.
    conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
    Ok(())
}
