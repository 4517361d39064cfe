use std::marker::PhantomData;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use crate::error::{Result, RunnerError};
use crate::queue::job::{Job, JobKind, JobStatus, QueueStatus};

/// How long a statement waits on another writer's lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS launch_queue (
    ordinal   INTEGER PRIMARY KEY AUTOINCREMENT,
    udid      TEXT    NOT NULL,
    ip        TEXT    NOT NULL,
    bundle_id TEXT    NOT NULL,
    status    INTEGER NOT NULL DEFAULT 0,
    error     TEXT
);
CREATE TABLE IF NOT EXISTS mount_queue (
    ordinal   INTEGER PRIMARY KEY AUTOINCREMENT,
    udid      TEXT    NOT NULL,
    ip        TEXT    NOT NULL,
    status    INTEGER NOT NULL DEFAULT 0,
    error     TEXT
);
";

/// Create both queue tables if they do not exist yet.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Claim/complete/fail access to one kind's table.
///
/// Every instance owns its own SQLite connection, so several loops (or
/// several processes) may poll the same table. Exclusivity of a claim comes
/// from the `BEGIN IMMEDIATE` transaction in [`JobQueue::claim_next`], not from
/// any in-process coordination. Clones share the connection.
#[derive(Debug)]
pub struct JobQueue<K: JobKind> {
    conn: Arc<Mutex<Connection>>,
    _kind: PhantomData<K>,
}

impl<K: JobKind> Clone for JobQueue<K> {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            _kind: PhantomData,
        }
    }
}

impl<K: JobKind> JobQueue<K> {
    /// Open (or create) the database at `path` with a dedicated connection.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            _kind: PhantomData,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| RunnerError::Internal(format!("{} queue connection poisoned", K::NAME)))
    }

    /// Run a blocking queue operation off the async runtime.
    pub async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&JobQueue<K>) -> Result<T> + Send + 'static,
    {
        let queue = self.clone();
        tokio::task::spawn_blocking(move || f(&queue))
            .await
            .map_err(|e| RunnerError::Internal(format!("queue task failed: {e}")))?
    }

    fn select_columns() -> String {
        let payload = K::PAYLOAD_COLUMN.unwrap_or("NULL");
        format!("ordinal, udid, ip, {payload}, status, error")
    }

    fn read_row(row: &Row<'_>) -> rusqlite::Result<Job<K>> {
        let status_code: i64 = row.get(4)?;
        let status = JobStatus::from_code(status_code).ok_or_else(|| {
            rusqlite::Error::IntegralValueOutOfRange(4, status_code)
        })?;
        Ok(Job {
            ordinal: row.get(0)?,
            udid: row.get(1)?,
            ip: row.get(2)?,
            payload: K::decode_payload(3, row.get(3)?)?,
            status,
            error: row.get(5)?,
        })
    }

    /// Atomically claim the pending job with the smallest ordinal.
    ///
    /// Selection and the Pending -> Claimed update share one immediate
    /// transaction, so concurrent claimants never receive the same ordinal.
    /// Returns `None` (after committing the empty transaction) when nothing
    /// is pending.
    pub fn claim_next(&self) -> Result<Option<Job<K>>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let query = format!(
            "SELECT {} FROM {} WHERE status = ?1 ORDER BY ordinal ASC LIMIT 1",
            Self::select_columns(),
            K::TABLE
        );
        let job = tx
            .query_row(&query, params![JobStatus::Pending.code()], Self::read_row)
            .optional()?;

        let job = match job {
            Some(mut job) => {
                tx.execute(
                    &format!("UPDATE {} SET status = ?1 WHERE ordinal = ?2", K::TABLE),
                    params![JobStatus::Claimed.code(), job.ordinal],
                )?;
                job.status = JobStatus::Claimed;
                Some(job)
            }
            None => None,
        };

        tx.commit()?;
        Ok(job)
    }

    /// Delete a finished job. Deleting a missing row is not an error.
    pub fn complete(&self, ordinal: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!("DELETE FROM {} WHERE ordinal = ?1", K::TABLE),
            params![ordinal],
        )?;
        Ok(())
    }

    /// Mark a job as failed. The row is kept until someone reads the error.
    pub fn fail(&self, ordinal: i64, error: &str) -> Result<()> {
        let error = if error.trim().is_empty() {
            "Unknown error"
        } else {
            error
        };
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "UPDATE {} SET status = ?1, error = ?2 WHERE ordinal = ?3",
                K::TABLE
            ),
            params![JobStatus::Failed.code(), error, ordinal],
        )?;
        Ok(())
    }

    /// Insert a pending job and return its ordinal.
    pub fn enqueue(&self, udid: &str, ip: &str, payload: &K::Payload) -> Result<i64> {
        let conn = self.lock()?;
        match (K::PAYLOAD_COLUMN, K::encode_payload(payload)) {
            (Some(column), Some(value)) => conn.execute(
                &format!(
                    "INSERT INTO {} (udid, ip, {column}, status) VALUES (?1, ?2, ?3, ?4)",
                    K::TABLE
                ),
                params![udid, ip, value, JobStatus::Pending.code()],
            )?,
            _ => conn.execute(
                &format!(
                    "INSERT INTO {} (udid, ip, status) VALUES (?1, ?2, ?3)",
                    K::TABLE
                ),
                params![udid, ip, JobStatus::Pending.code()],
            )?,
        };
        Ok(conn.last_insert_rowid())
    }

    pub fn get(&self, ordinal: i64) -> Result<Option<Job<K>>> {
        let conn = self.lock()?;
        let query = format!(
            "SELECT {} FROM {} WHERE ordinal = ?1",
            Self::select_columns(),
            K::TABLE
        );
        Ok(conn
            .query_row(&query, params![ordinal], Self::read_row)
            .optional()?)
    }

    /// All rows in claim order.
    pub fn list(&self) -> Result<Vec<Job<K>>> {
        let conn = self.lock()?;
        let query = format!(
            "SELECT {} FROM {} ORDER BY ordinal ASC",
            Self::select_columns(),
            K::TABLE
        );
        let mut stmt = conn.prepare(&query)?;
        let jobs = stmt
            .query_map([], Self::read_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    /// Where the oldest job for `udid` stands. Does not modify the table.
    pub fn status(&self, udid: &str) -> Result<QueueStatus> {
        let conn = self.lock()?;
        Self::status_locked(&conn, udid).map(|(status, _)| status)
    }

    /// Like [`JobQueue::status`], but a failed job is removed once its error
    /// has been reported.
    pub fn take_status(&self, udid: &str) -> Result<QueueStatus> {
        let conn = self.lock()?;
        let (status, ordinal) = Self::status_locked(&conn, udid)?;
        if let (QueueStatus::Failed(_), Some(ordinal)) = (&status, ordinal) {
            conn.execute(
                &format!("DELETE FROM {} WHERE ordinal = ?1", K::TABLE),
                params![ordinal],
            )?;
        }
        Ok(status)
    }

    fn status_locked(conn: &Connection, udid: &str) -> Result<(QueueStatus, Option<i64>)> {
        let row: Option<(i64, i64, Option<String>)> = conn
            .query_row(
                &format!(
                    "SELECT ordinal, status, error FROM {} WHERE udid = ?1 ORDER BY ordinal ASC LIMIT 1",
                    K::TABLE
                ),
                params![udid],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((ordinal, status, error)) = row else {
            return Ok((QueueStatus::NotQueued, None));
        };

        let status = match JobStatus::from_code(status) {
            Some(JobStatus::Claimed) => QueueStatus::InProgress,
            Some(JobStatus::Failed) => {
                QueueStatus::Failed(error.unwrap_or_else(|| "Unknown error".to_string()))
            }
            Some(JobStatus::Pending) => {
                let ahead: i64 = conn.query_row(
                    &format!(
                        "SELECT COUNT(*) FROM {} WHERE ordinal < ?1 AND status = ?2",
                        K::TABLE
                    ),
                    params![ordinal, JobStatus::Pending.code()],
                    |row| row.get(0),
                )?;
                QueueStatus::Position(usize::try_from(ahead).unwrap_or_default())
            }
            None => {
                return Err(RunnerError::Internal(format!(
                    "{} job {ordinal} has unknown status {status}",
                    K::NAME
                )))
            }
        };
        Ok((status, Some(ordinal)))
    }

    /// Delete every row. Returns the number removed.
    pub fn clear(&self) -> Result<usize> {
        let conn = self.lock()?;
        Ok(conn.execute(&format!("DELETE FROM {}", K::TABLE), [])?)
    }

    /// Number of rows in each state: (pending, claimed, failed).
    pub fn counts(&self) -> Result<(usize, usize, usize)> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT status, COUNT(*) FROM {} GROUP BY status",
            K::TABLE
        ))?;
        let mut counts = (0, 0, 0);
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (status, count) = row?;
            let count = usize::try_from(count).unwrap_or_default();
            match JobStatus::from_code(status) {
                Some(JobStatus::Pending) => counts.0 = count,
                Some(JobStatus::Claimed) => counts.1 = count,
                Some(JobStatus::Failed) => counts.2 = count,
                None => {}
            }
        }
        Ok(counts)
    }
}
