//! Shared SQLite handle for the registry and the durable persistence queue.
//!
//! One connection, WAL journaling, foreign keys on, 5-second busy timeout.
//! Single-writer semantics come from the single open connection; callers
//! serialize through the mutex.

use crate::error::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub type Db = Arc<Mutex<Connection>>;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS remembered_paths (
    id           INTEGER PRIMARY KEY,
    path         TEXT NOT NULL UNIQUE,
    config_json  TEXT NOT NULL,
    last_walk_at INTEGER,
    created_at   INTEGER NOT NULL,
    updated_at   INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS file_state (
    id                     INTEGER PRIMARY KEY,
    path                   TEXT NOT NULL UNIQUE,
    content_hash           TEXT NOT NULL,
    metadata_hash          TEXT NOT NULL,
    size                   INTEGER NOT NULL,
    mod_time               INTEGER NOT NULL,
    last_analyzed_at       INTEGER,
    analysis_version       TEXT,
    metadata_analyzed_at   INTEGER,
    semantic_analyzed_at   INTEGER,
    semantic_error         TEXT,
    semantic_retry_count   INTEGER NOT NULL DEFAULT 0,
    embeddings_analyzed_at INTEGER,
    embeddings_error       TEXT,
    embeddings_retry_count INTEGER NOT NULL DEFAULT 0,
    created_at             INTEGER NOT NULL,
    updated_at             INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS persistence_queue (
    id           INTEGER PRIMARY KEY,
    file_path    TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    result_json  TEXT NOT NULL,
    status       TEXT NOT NULL DEFAULT 'pending'
                 CHECK (status IN ('pending', 'inflight', 'completed', 'failed')),
    retry_count  INTEGER NOT NULL DEFAULT 0,
    last_error   TEXT,
    enqueued_at  INTEGER NOT NULL,
    started_at   INTEGER,
    completed_at INTEGER,
    UNIQUE (file_path, content_hash)
);

CREATE INDEX IF NOT EXISTS idx_persistence_queue_status
    ON persistence_queue (status, enqueued_at);
"#;

/// Open (or create) the daemon database at `path` and run migrations.
pub fn open(path: &Path) -> Result<Db> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// In-memory database for tests.
pub fn open_in_memory() -> Result<Db> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

fn configure(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
}
