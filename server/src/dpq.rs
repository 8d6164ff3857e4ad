//! Durable persistence queue: a relational FIFO buffering analysis results
//! while the graph store is unreachable.
//!
//! Rows are keyed by (file_path, content_hash); re-enqueueing an existing
//! pair replaces the payload and resets the row to pending. The drain worker
//! consumes rows in `enqueued_at` order.

use crate::db::Db;
use crate::error::{Error, Result};
use crate::types::now_nanos;
use rusqlite::{params, Row};
use std::time::Duration;
use tracing::debug;

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    Pending,
    Inflight,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Inflight => "inflight",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "inflight" => Ok(QueueStatus::Inflight),
            "completed" => Ok(QueueStatus::Completed),
            "failed" => Ok(QueueStatus::Failed),
            other => Err(Error::State(format!("unknown queue status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuedResult {
    pub id: i64,
    pub file_path: String,
    pub content_hash: String,
    pub result_json: String,
    pub status: QueueStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub enqueued_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl QueuedResult {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(QueuedResult {
            id: row.get("id")?,
            file_path: row.get("file_path")?,
            content_hash: row.get("content_hash")?,
            result_json: row.get("result_json")?,
            status: QueueStatus::parse(&row.get::<_, String>("status")?)
                .map_err(|_| rusqlite::Error::InvalidQuery)?,
            retry_count: row.get::<_, i64>("retry_count")? as u32,
            last_error: row.get("last_error")?,
            enqueued_at: row.get("enqueued_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

/// Per-status counts plus the oldest pending enqueue time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: u64,
    pub inflight: u64,
    pub completed: u64,
    pub failed: u64,
    pub oldest_pending: Option<i64>,
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PersistenceQueue {
    db: Db,
}

impl PersistenceQueue {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Upsert by (file_path, content_hash). On conflict the payload is
    /// replaced and the row resets: status pending, retries zeroed, error
    /// and progress timestamps cleared.
    pub fn enqueue(&self, file_path: &str, content_hash: &str, result_json: &str) -> Result<i64> {
        let now = now_nanos();
        let conn = self.db.lock().unwrap();
        conn.execute(
            "INSERT INTO persistence_queue
                (file_path, content_hash, result_json, status, retry_count, last_error,
                 enqueued_at, started_at, completed_at)
             VALUES (?1, ?2, ?3, 'pending', 0, NULL, ?4, NULL, NULL)
             ON CONFLICT(file_path, content_hash) DO UPDATE SET
                result_json = excluded.result_json,
                status = 'pending',
                retry_count = 0,
                last_error = NULL,
                enqueued_at = excluded.enqueued_at,
                started_at = NULL,
                completed_at = NULL",
            params![file_path, content_hash, result_json, now],
        )?;
        let id = conn.query_row(
            "SELECT id FROM persistence_queue WHERE file_path = ?1 AND content_hash = ?2",
            params![file_path, content_hash],
            |r| r.get(0),
        )?;
        debug!(path = file_path, id = id, "result buffered in persistence queue");
        Ok(id)
    }

    /// Claim up to `n` of the oldest pending rows; all claimed rows move to
    /// inflight within one transaction.
    pub fn dequeue_batch(&self, n: usize) -> Result<Vec<QueuedResult>> {
        let now = now_nanos();
        let mut conn = self.db.lock().unwrap();
        let tx = conn.transaction()?;

        let mut batch = {
            let mut stmt = tx.prepare(
                "SELECT * FROM persistence_queue
                 WHERE status = 'pending'
                 ORDER BY enqueued_at ASC, id ASC
                 LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![n as i64], QueuedResult::from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        for item in &mut batch {
            tx.execute(
                "UPDATE persistence_queue SET status = 'inflight', started_at = ?2 WHERE id = ?1",
                params![item.id, now],
            )?;
            item.status = QueueStatus::Inflight;
            item.started_at = Some(now);
        }

        tx.commit()?;
        Ok(batch)
    }

    pub fn complete(&self, id: i64) -> Result<()> {
        let conn = self.db.lock().unwrap();
        let updated = conn.execute(
            "UPDATE persistence_queue SET status = 'completed', completed_at = ?2 WHERE id = ?1",
            params![id, now_nanos()],
        )?;
        if updated == 0 {
            return Err(Error::State(format!("complete: unknown persistence queue id {id}")));
        }
        Ok(())
    }

    /// Record a failed re-persist attempt. The row returns to pending until
    /// `max_retries` attempts have been burned, then parks as failed.
    pub fn fail(&self, id: i64, max_retries: u32, error: &str) -> Result<()> {
        let now = now_nanos();
        let mut conn = self.db.lock().unwrap();
        let tx = conn.transaction()?;

        let retry_count: Option<i64> = {
            let mut stmt = tx.prepare("SELECT retry_count FROM persistence_queue WHERE id = ?1")?;
            let mut rows = stmt.query(params![id])?;
            match rows.next()? {
                Some(row) => Some(row.get(0)?),
                None => None,
            }
        };
        let retry_count = retry_count
            .ok_or_else(|| Error::State(format!("fail: unknown persistence queue id {id}")))?
            as u32
            + 1;

        if retry_count >= max_retries {
            tx.execute(
                "UPDATE persistence_queue SET
                    status = 'failed', retry_count = ?2, last_error = ?3, completed_at = ?4
                 WHERE id = ?1",
                params![id, retry_count, error, now],
            )?;
        } else {
            tx.execute(
                "UPDATE persistence_queue SET
                    status = 'pending', retry_count = ?2, last_error = ?3, started_at = NULL
                 WHERE id = ?1",
                params![id, retry_count, error],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Delete terminal rows older than the given retentions; returns how many
    /// rows were removed.
    pub fn purge(&self, completed_older_than: Duration, failed_older_than: Duration) -> Result<u64> {
        let now = now_nanos();
        let completed_cutoff = now - completed_older_than.as_nanos() as i64;
        let failed_cutoff = now - failed_older_than.as_nanos() as i64;

        let conn = self.db.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM persistence_queue
             WHERE (status = 'completed' AND completed_at IS NOT NULL AND completed_at < ?1)
                OR (status = 'failed' AND completed_at IS NOT NULL AND completed_at < ?2)",
            params![completed_cutoff, failed_cutoff],
        )?;
        Ok(removed as u64)
    }

    pub fn stats(&self) -> Result<QueueCounts> {
        let conn = self.db.lock().unwrap();
        let mut counts = QueueCounts::default();

        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM persistence_queue GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        for row in rows {
            let (status, count) = row?;
            match QueueStatus::parse(&status)? {
                QueueStatus::Pending => counts.pending = count,
                QueueStatus::Inflight => counts.inflight = count,
                QueueStatus::Completed => counts.completed = count,
                QueueStatus::Failed => counts.failed = count,
            }
        }

        counts.oldest_pending = conn.query_row(
            "SELECT MIN(enqueued_at) FROM persistence_queue WHERE status = 'pending'",
            [],
            |r| r.get(0),
        )?;
        Ok(counts)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
