//! Per-file lifecycle state in the relational store.
//!
//! One row per path tracks content/metadata hashes plus the timestamps,
//! errors, and retry counts of each analysis stage. A second table remembers
//! ancestor paths and their configuration; the deepest remembered ancestor
//! supplies a file's effective config.

use crate::db::Db;
use crate::error::{Error, Result};
use crate::types::{now_nanos, PathConfig};
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FileState {
    pub path: String,
    pub content_hash: String,
    pub metadata_hash: String,
    pub size: u64,
    pub mod_time: i64,
    pub last_analyzed_at: Option<i64>,
    pub analysis_version: Option<String>,
    pub metadata_analyzed_at: Option<i64>,
    pub semantic_analyzed_at: Option<i64>,
    pub semantic_error: Option<String>,
    pub semantic_retry_count: u32,
    pub embeddings_analyzed_at: Option<i64>,
    pub embeddings_error: Option<String>,
    pub embeddings_retry_count: u32,
    pub created_at: i64,
    pub updated_at: i64,
}

impl FileState {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(FileState {
            path: row.get("path")?,
            content_hash: row.get("content_hash")?,
            metadata_hash: row.get("metadata_hash")?,
            size: row.get::<_, i64>("size")? as u64,
            mod_time: row.get("mod_time")?,
            last_analyzed_at: row.get("last_analyzed_at")?,
            analysis_version: row.get("analysis_version")?,
            metadata_analyzed_at: row.get("metadata_analyzed_at")?,
            semantic_analyzed_at: row.get("semantic_analyzed_at")?,
            semantic_error: row.get("semantic_error")?,
            semantic_retry_count: row.get::<_, i64>("semantic_retry_count")? as u32,
            embeddings_analyzed_at: row.get("embeddings_analyzed_at")?,
            embeddings_error: row.get("embeddings_error")?,
            embeddings_retry_count: row.get::<_, i64>("embeddings_retry_count")? as u32,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

const SELECT_FILE_STATE: &str = "SELECT * FROM file_state WHERE path = ?1";

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Registry {
    db: Db,
}

impl Registry {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn get(&self, path: &str) -> Result<Option<FileState>> {
        let conn = self.db.lock().unwrap();
        Ok(conn
            .query_row(SELECT_FILE_STATE, params![path], FileState::from_row)
            .optional()?)
    }

    /// Record new metadata for a path as one transaction.
    ///
    /// When the stored content hash differs from `content_hash`, all analysis
    /// state is cleared before the new metadata lands; hash comparison, clear,
    /// and write share the transaction, so a concurrent worker can never erase
    /// state derived from the newer content. Returns true when the content
    /// hash changed (or the row is new).
    pub fn sync_metadata(
        &self,
        path: &str,
        content_hash: &str,
        metadata_hash: &str,
        size: u64,
        mod_time: i64,
        analysis_version: &str,
    ) -> Result<bool> {
        let now = now_nanos();
        let mut conn = self.db.lock().unwrap();
        let tx = conn.transaction()?;

        let previous: Option<String> = tx
            .query_row("SELECT content_hash FROM file_state WHERE path = ?1", params![path], |r| {
                r.get(0)
            })
            .optional()?;

        let changed = previous.as_deref() != Some(content_hash);
        if changed && previous.is_some() {
            debug!(path = path, "content hash changed, clearing analysis state");
            tx.execute(
                "UPDATE file_state SET
                    last_analyzed_at = NULL, analysis_version = NULL,
                    metadata_analyzed_at = NULL,
                    semantic_analyzed_at = NULL, semantic_error = NULL, semantic_retry_count = 0,
                    embeddings_analyzed_at = NULL, embeddings_error = NULL, embeddings_retry_count = 0,
                    updated_at = ?2
                 WHERE path = ?1",
                params![path, now],
            )?;
        }

        tx.execute(
            "INSERT INTO file_state
                (path, content_hash, metadata_hash, size, mod_time,
                 last_analyzed_at, analysis_version, metadata_analyzed_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?6, ?6, ?6)
             ON CONFLICT(path) DO UPDATE SET
                content_hash = excluded.content_hash,
                metadata_hash = excluded.metadata_hash,
                size = excluded.size,
                mod_time = excluded.mod_time,
                last_analyzed_at = excluded.last_analyzed_at,
                analysis_version = excluded.analysis_version,
                metadata_analyzed_at = excluded.metadata_analyzed_at,
                updated_at = excluded.updated_at",
            params![path, content_hash, metadata_hash, size as i64, mod_time, now, analysis_version],
        )?;

        tx.commit()?;
        Ok(changed)
    }

    /// Null all analysis fields and zero the retry counts.
    pub fn clear_analysis_state(&self, path: &str) -> Result<()> {
        let conn = self.db.lock().unwrap();
        conn.execute(
            "UPDATE file_state SET
                last_analyzed_at = NULL, analysis_version = NULL,
                metadata_analyzed_at = NULL,
                semantic_analyzed_at = NULL, semantic_error = NULL, semantic_retry_count = 0,
                embeddings_analyzed_at = NULL, embeddings_error = NULL, embeddings_retry_count = 0,
                updated_at = ?2
             WHERE path = ?1",
            params![path, now_nanos()],
        )?;
        Ok(())
    }

    pub fn semantic_success(&self, path: &str) -> Result<()> {
        let conn = self.db.lock().unwrap();
        let now = now_nanos();
        conn.execute(
            "UPDATE file_state SET
                semantic_analyzed_at = ?2, semantic_error = NULL, semantic_retry_count = 0,
                updated_at = ?2
             WHERE path = ?1",
            params![path, now],
        )?;
        Ok(())
    }

    pub fn semantic_failure(&self, path: &str, error: &str) -> Result<()> {
        let conn = self.db.lock().unwrap();
        conn.execute(
            "UPDATE file_state SET
                semantic_error = ?2, semantic_retry_count = semantic_retry_count + 1,
                updated_at = ?3
             WHERE path = ?1",
            params![path, error, now_nanos()],
        )?;
        Ok(())
    }

    pub fn embeddings_success(&self, path: &str) -> Result<()> {
        let conn = self.db.lock().unwrap();
        let now = now_nanos();
        conn.execute(
            "UPDATE file_state SET
                embeddings_analyzed_at = ?2, embeddings_error = NULL, embeddings_retry_count = 0,
                updated_at = ?2
             WHERE path = ?1",
            params![path, now],
        )?;
        Ok(())
    }

    pub fn embeddings_failure(&self, path: &str, error: &str) -> Result<()> {
        let conn = self.db.lock().unwrap();
        conn.execute(
            "UPDATE file_state SET
                embeddings_error = ?2, embeddings_retry_count = embeddings_retry_count + 1,
                updated_at = ?3
             WHERE path = ?1",
            params![path, error, now_nanos()],
        )?;
        Ok(())
    }

    /// Drop a file's row entirely (file deleted or skipped permanently).
    pub fn delete(&self, path: &str) -> Result<()> {
        let conn = self.db.lock().unwrap();
        conn.execute("DELETE FROM file_state WHERE path = ?1", params![path])?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Remembered paths
    // -----------------------------------------------------------------------

    /// Remember an ancestor path with its configuration (upsert).
    pub fn remember_path(&self, path: &str, config: &PathConfig) -> Result<()> {
        let json = serde_json::to_string(config)?;
        let now = now_nanos();
        let conn = self.db.lock().unwrap();
        conn.execute(
            "INSERT INTO remembered_paths (path, config_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(path) DO UPDATE SET
                config_json = excluded.config_json, updated_at = excluded.updated_at",
            params![path, json, now],
        )?;
        Ok(())
    }

    pub fn forget_path(&self, path: &str) -> Result<()> {
        let conn = self.db.lock().unwrap();
        conn.execute("DELETE FROM remembered_paths WHERE path = ?1", params![path])?;
        Ok(())
    }

    /// Record the time of the latest discovery walk under a remembered path.
    pub fn touch_walk(&self, path: &str) -> Result<()> {
        let conn = self.db.lock().unwrap();
        conn.execute(
            "UPDATE remembered_paths SET last_walk_at = ?2, updated_at = ?2 WHERE path = ?1",
            params![path, now_nanos()],
        )?;
        Ok(())
    }

    /// Configuration of the deepest remembered ancestor of `file_path`,
    /// or defaults when no ancestor is remembered.
    pub fn effective_config(&self, file_path: &str) -> Result<PathConfig> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare("SELECT path, config_json FROM remembered_paths")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut best: Option<(String, String)> = None;
        for row in rows {
            let (ancestor, json) = row?;
            if !is_ancestor(&ancestor, file_path) {
                continue;
            }
            if best.as_ref().map(|(b, _)| ancestor.len() > b.len()).unwrap_or(true) {
                best = Some((ancestor, json));
            }
        }

        match best {
            Some((_, json)) => serde_json::from_str(&json)
                .map_err(|e| Error::State(format!("corrupt config_json: {e}"))),
            None => Ok(PathConfig::default()),
        }
    }
}

/// Path-component-aware ancestry: `/a/b` is an ancestor of `/a/b/c.txt`
/// but not of `/a/bc.txt`.
fn is_ancestor(ancestor: &str, path: &str) -> bool {
    let ancestor = ancestor.trim_end_matches('/');
    path == ancestor
        || (path.starts_with(ancestor) && path.as_bytes().get(ancestor.len()) == Some(&b'/'))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn registry() -> Registry {
        Registry::new(db::open_in_memory().unwrap())
    }

    #[test]
    fn sync_metadata_inserts_and_reports_change() {
        let reg = registry();
        let changed = reg.sync_metadata("/a.txt", "h1", "m1", 10, 100, "1.0").unwrap();
        assert!(changed);

        let state = reg.get("/a.txt").unwrap().unwrap();
        assert_eq!(state.content_hash, "h1");
        assert_eq!(state.metadata_hash, "m1");
        assert_eq!(state.size, 10);
        assert!(state.metadata_analyzed_at.is_some());
        assert_eq!(state.analysis_version.as_deref(), Some("1.0"));

        // Same hash again: no change reported.
        let changed = reg.sync_metadata("/a.txt", "h1", "m2", 10, 101, "1.0").unwrap();
        assert!(!changed);
    }

    #[test]
    fn content_change_clears_analysis_state_first() {
        let reg = registry();
        reg.sync_metadata("/a.txt", "h1", "m1", 10, 100, "1.0").unwrap();
        reg.semantic_success("/a.txt").unwrap();
        reg.embeddings_failure("/a.txt", "provider down").unwrap();

        let state = reg.get("/a.txt").unwrap().unwrap();
        assert!(state.semantic_analyzed_at.is_some());
        assert_eq!(state.embeddings_retry_count, 1);

        // New content hash: analysis fields must be reset before metadata lands.
        let changed = reg.sync_metadata("/a.txt", "h2", "m2", 11, 200, "1.0").unwrap();
        assert!(changed);

        let state = reg.get("/a.txt").unwrap().unwrap();
        assert_eq!(state.content_hash, "h2");
        assert!(state.semantic_analyzed_at.is_none());
        assert!(state.semantic_error.is_none());
        assert_eq!(state.semantic_retry_count, 0);
        assert!(state.embeddings_analyzed_at.is_none());
        assert!(state.embeddings_error.is_none());
        assert_eq!(state.embeddings_retry_count, 0);
        // Metadata fields for the new run are present.
        assert!(state.metadata_analyzed_at.is_some());
    }

    #[test]
    fn stage_updaters_clear_and_bump() {
        let reg = registry();
        reg.sync_metadata("/a.txt", "h1", "m1", 1, 1, "1.0").unwrap();

        reg.semantic_failure("/a.txt", "timeout").unwrap();
        reg.semantic_failure("/a.txt", "timeout").unwrap();
        let state = reg.get("/a.txt").unwrap().unwrap();
        assert_eq!(state.semantic_retry_count, 2);
        assert_eq!(state.semantic_error.as_deref(), Some("timeout"));

        reg.semantic_success("/a.txt").unwrap();
        let state = reg.get("/a.txt").unwrap().unwrap();
        assert_eq!(state.semantic_retry_count, 0);
        assert!(state.semantic_error.is_none());
        assert!(state.semantic_analyzed_at.is_some());
    }

    #[test]
    fn effective_config_picks_deepest_ancestor() {
        let reg = registry();
        reg.remember_path("/home/user", &PathConfig { use_vision: false }).unwrap();
        reg.remember_path("/home/user/photos", &PathConfig { use_vision: true }).unwrap();

        assert!(reg.effective_config("/home/user/photos/cat.png").unwrap().use_vision);
        assert!(!reg.effective_config("/home/user/docs/a.txt").unwrap().use_vision);
        // No remembered ancestor: defaults.
        assert_eq!(reg.effective_config("/elsewhere/x").unwrap(), PathConfig::default());

        // Forgetting the deeper ancestor falls back to the parent.
        reg.forget_path("/home/user/photos").unwrap();
        assert!(!reg.effective_config("/home/user/photos/cat.png").unwrap().use_vision);
    }

    #[test]
    fn ancestry_respects_path_components() {
        assert!(is_ancestor("/a/b", "/a/b/c.txt"));
        assert!(is_ancestor("/a/b", "/a/b"));
        assert!(!is_ancestor("/a/b", "/a/bc.txt"));
    }

    #[test]
    fn delete_removes_row() {
        let reg = registry();
        reg.sync_metadata("/a.txt", "h1", "m1", 1, 1, "1.0").unwrap();
        reg.delete("/a.txt").unwrap();
        assert!(reg.get("/a.txt").unwrap().is_none());
    }
}
