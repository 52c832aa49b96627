//! SQLite-backed [`JobStore`].
//!
//! Survives restarts of the gateway, but jobs claimed before a crash are not
//! re-dispatched: `claimed` is persisted like every other field.

use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, warn};

use crate::{
    error::{Result, SchedulerError},
    store::JobStore,
    types::{now_millis, CallStatus, ClaimOutcome, ScheduledCall, SubmitOutcome},
};

const COLUMNS: &str = "id, destination, title, description, call_at, scheduled_at,
     due_time_label, claimed, status, call_reference_id, snoozed_from_id,
     last_error, updated_at";

/// Initialise the scheduled-call schema in `conn`.
///
/// Creates the `scheduled_calls` table (idempotent) and an index on
/// `(claimed, call_at)` so the due-job scan stays cheap.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS scheduled_calls (
            id                 TEXT    NOT NULL PRIMARY KEY,
            destination        TEXT    NOT NULL,
            title              TEXT    NOT NULL,
            description        TEXT,
            call_at            INTEGER NOT NULL,   -- epoch millis
            scheduled_at       INTEGER NOT NULL,
            due_time_label     TEXT    NOT NULL,
            claimed            INTEGER NOT NULL DEFAULT 0,
            status             TEXT    NOT NULL DEFAULT 'scheduled',
            call_reference_id  TEXT,
            snoozed_from_id    TEXT,
            last_error         TEXT,
            updated_at         INTEGER NOT NULL
        ) STRICT;

        -- Due scan: WHERE claimed = 0 AND call_at <= ?
        CREATE INDEX IF NOT EXISTS idx_scheduled_calls_due
            ON scheduled_calls (claimed, call_at);
        ",
    )?;
    Ok(())
}

pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::new(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-statement leaves no partial state behind in SQLite.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<ScheduledCall> {
    let status: String = row.get(8)?;
    let status = status.parse::<CallStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(ScheduledCall {
        id: row.get(0)?,
        destination: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        call_at: row.get(4)?,
        scheduled_at: row.get(5)?,
        due_time_label: row.get(6)?,
        claimed: row.get(7)?,
        status,
        call_reference_id: row.get(9)?,
        snoozed_from_id: row.get(10)?,
        last_error: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

fn fetch(conn: &Connection, id: &str) -> Result<Option<ScheduledCall>> {
    let sql = format!("SELECT {COLUMNS} FROM scheduled_calls WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], row_to_job).optional()?)
}

fn write_back(conn: &Connection, job: &ScheduledCall) -> Result<()> {
    conn.execute(
        "UPDATE scheduled_calls SET
            title = ?2, description = ?3, call_at = ?4, due_time_label = ?5,
            claimed = ?6, status = ?7, call_reference_id = ?8,
            snoozed_from_id = ?9, last_error = ?10, updated_at = ?11
         WHERE id = ?1",
        params![
            job.id,
            job.title,
            job.description,
            job.call_at,
            job.due_time_label,
            job.claimed,
            job.status.as_str(),
            job.call_reference_id,
            job.snoozed_from_id,
            job.last_error,
            job.updated_at,
        ],
    )?;
    Ok(())
}

fn query_jobs(conn: &Connection, sql: &str, args: impl rusqlite::Params) -> Result<Vec<ScheduledCall>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let jobs = stmt
        .query_map(args, row_to_job)?
        .filter_map(|r| match r {
            Ok(job) => Some(job),
            Err(e) => {
                warn!("skipping unreadable scheduled_calls row: {e}");
                None
            }
        })
        .collect();
    Ok(jobs)
}

impl JobStore for SqliteJobStore {
    fn upsert(&self, job: ScheduledCall) -> Result<SubmitOutcome> {
        let conn = self.lock();
        match fetch(&conn, &job.id)? {
            Some(existing) if existing.claimed => Err(SchedulerError::AlreadyClaimed { id: job.id }),
            Some(mut existing) => {
                existing.apply_resubmission(&job);
                write_back(&conn, &existing)?;
                Ok(SubmitOutcome::Updated)
            }
            None => {
                conn.execute(
                    &format!(
                        "INSERT INTO scheduled_calls ({COLUMNS})
                         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)"
                    ),
                    params![
                        job.id,
                        job.destination,
                        job.title,
                        job.description,
                        job.call_at,
                        job.scheduled_at,
                        job.due_time_label,
                        job.claimed,
                        job.status.as_str(),
                        job.call_reference_id,
                        job.snoozed_from_id,
                        job.last_error,
                        job.updated_at,
                    ],
                )?;
                Ok(SubmitOutcome::Inserted)
            }
        }
    }

    fn cancel(&self, id: &str) -> Result<bool> {
        let n = self
            .lock()
            .execute("DELETE FROM scheduled_calls WHERE id = ?1 AND claimed = 0", [id])?;
        Ok(n > 0)
    }

    fn due_jobs(&self, now: i64) -> Result<Vec<ScheduledCall>> {
        let conn = self.lock();
        query_jobs(
            &conn,
            &format!(
                "SELECT {COLUMNS} FROM scheduled_calls
                 WHERE claimed = 0 AND call_at <= ?1 ORDER BY call_at"
            ),
            [now],
        )
    }

    fn claim(&self, id: &str) -> Result<ClaimOutcome> {
        let conn = self.lock();
        let n = conn.execute(
            "UPDATE scheduled_calls SET claimed = 1, status = 'calling', updated_at = ?2
             WHERE id = ?1 AND claimed = 0",
            params![id, now_millis()],
        )?;
        if n == 1 {
            return Ok(match fetch(&conn, id)? {
                Some(job) => ClaimOutcome::Claimed(job),
                None => ClaimOutcome::Missing,
            });
        }
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM scheduled_calls WHERE id = ?1)",
            [id],
            |row| row.get(0),
        )?;
        debug!(call_id = %id, exists, "claim lost");
        Ok(if exists {
            ClaimOutcome::AlreadyClaimed
        } else {
            ClaimOutcome::Missing
        })
    }

    fn get(&self, id: &str) -> Result<Option<ScheduledCall>> {
        fetch(&self.lock(), id)
    }

    fn list(&self) -> Result<Vec<ScheduledCall>> {
        let conn = self.lock();
        query_jobs(
            &conn,
            &format!("SELECT {COLUMNS} FROM scheduled_calls ORDER BY call_at, id"),
            params![],
        )
    }

    fn remove_if(
        &self,
        id: &str,
        pred: &dyn Fn(&ScheduledCall) -> bool,
    ) -> Result<Option<ScheduledCall>> {
        let conn = self.lock();
        match fetch(&conn, id)? {
            Some(job) if pred(&job) => {
                conn.execute("DELETE FROM scheduled_calls WHERE id = ?1", [id])?;
                Ok(Some(job))
            }
            _ => Ok(None),
        }
    }

    fn len(&self) -> Result<usize> {
        let n: i64 = self
            .lock()
            .query_row("SELECT COUNT(*) FROM scheduled_calls", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    fn modify(
        &self,
        id: &str,
        f: &mut dyn FnMut(&mut ScheduledCall) -> bool,
    ) -> Result<Option<ScheduledCall>> {
        let conn = self.lock();
        let Some(job) = fetch(&conn, id)? else {
            return Ok(None);
        };
        let mut draft = job.clone();
        if f(&mut draft) {
            write_back(&conn, &draft)?;
            return Ok(Some(draft));
        }
        Ok(Some(job))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: i64 = 1_750_000_000_000;

    fn job(id: &str, call_at: i64) -> ScheduledCall {
        ScheduledCall::new(
            id,
            "+15551234567",
            "Take medicine",
            Some("with water".to_string()),
            call_at,
            T,
            "9:00 AM",
        )
    }

    #[test]
    fn stores_and_reads_back() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        assert_eq!(store.submit(job("r1", T), T).unwrap(), SubmitOutcome::Inserted);

        let stored = store.get("r1").unwrap().unwrap();
        assert_eq!(stored, job("r1", T));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn due_scan_and_claim() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        store.submit(job("early", T), T).unwrap();
        store.submit(job("late", T + 60_000), T).unwrap();

        let due = store.due_jobs(T).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, "early");

        match store.claim("early").unwrap() {
            ClaimOutcome::Claimed(j) => assert_eq!(j.status, CallStatus::Calling),
            other => panic!("expected claim, got {other:?}"),
        }
        assert_eq!(store.claim("early").unwrap(), ClaimOutcome::AlreadyClaimed);
        assert_eq!(store.claim("ghost").unwrap(), ClaimOutcome::Missing);
        assert!(store.due_jobs(T).unwrap().is_empty());
    }

    #[test]
    fn cancel_respects_claim() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        store.submit(job("a", T), T).unwrap();
        store.submit(job("b", T), T).unwrap();
        store.claim("b").unwrap();

        assert!(store.cancel("a").unwrap());
        assert!(!store.cancel("a").unwrap());
        assert!(!store.cancel("b").unwrap());
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn claimed_resubmission_conflicts() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        store.submit(job("r1", T), T).unwrap();
        store.claim("r1").unwrap();
        assert!(matches!(
            store.submit(job("r1", T + 1), T),
            Err(SchedulerError::AlreadyClaimed { .. })
        ));
    }

    #[test]
    fn remove_if_checks_the_stored_row() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        store.submit(job("r1", T), T).unwrap();

        assert!(store.remove_if("r1", &|j| j.claimed).unwrap().is_none());
        assert!(store.get("r1").unwrap().is_some());

        let removed = store.remove_if("r1", &|j| j.call_at == T).unwrap();
        assert_eq!(removed.map(|j| j.id), Some("r1".to_string()));
        assert!(store.get("r1").unwrap().is_none());
        assert!(store.remove_if("r1", &|_| true).unwrap().is_none());
    }

    #[test]
    fn modify_writes_only_on_change() {
        let store = SqliteJobStore::open_in_memory().unwrap();
        store.submit(job("r1", T), T).unwrap();

        let after = store
            .modify("r1", &mut |j: &mut ScheduledCall| {
                j.status = CallStatus::Failed;
                j.last_error = Some("timeout".into());
                true
            })
            .unwrap()
            .unwrap();
        assert_eq!(after.status, CallStatus::Failed);

        let untouched = store
            .modify("r1", &mut |j: &mut ScheduledCall| {
                j.title = "ignored".into();
                false
            })
            .unwrap()
            .unwrap();
        assert_eq!(untouched.title, "Take medicine");
        assert_eq!(store.get("r1").unwrap().unwrap().title, "Take medicine");
        assert_eq!(
            store.get("r1").unwrap().unwrap().last_error.as_deref(),
            Some("timeout")
        );
    }
}
