//! First pipeline stage: stat, head peek, classification, ingest routing,
//! and content hashing.
//!
//! Content is only held in memory when the chosen mode needs it; otherwise
//! the file is streamed through the hasher. All failures here surface as
//! `FileUnavailable` and are retried at the worker layer.

use crate::classify::{classify, decide};
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::types::DegradationMode;
use mnemo_core::{content_hash, metadata_hash, ContentHasher, FileKind, IngestMode, HEAD_PEEK_BYTES};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Output of the file reader: everything later stages need to route and
/// identify the file.
#[derive(Debug, Clone)]
pub struct FileReadResult {
    pub path: String,
    pub size: u64,
    /// Unix nanoseconds.
    pub mod_time: i64,
    pub kind: FileKind,
    pub mime: String,
    pub language: Option<String>,
    pub mode: IngestMode,
    pub reason: String,
    /// Set when queue degradation demoted the mode to metadata-only.
    pub degraded: bool,
    /// Full file bytes; present only when `mode.needs_content()`.
    pub content: Option<Vec<u8>>,
    pub content_hash: String,
    pub metadata_hash: String,
}

impl FileReadResult {
    /// Content as UTF-8, for chunking. Errors when the classifier let a
    /// non-UTF-8 file through with a content-bearing mode.
    pub fn content_str(&self) -> Result<&str> {
        let bytes = self
            .content
            .as_deref()
            .ok_or_else(|| Error::State(format!("no content retained for {}", self.path)))?;
        std::str::from_utf8(bytes)
            .map_err(|e| Error::Chunker(format!("{}: content is not UTF-8: {e}", self.path)))
    }
}

fn unavailable(path: &Path, err: std::io::Error) -> Error {
    Error::FileUnavailable(format!("{}: {err}", path.display()))
}

/// Stat, classify, and hash one file.
///
/// `semantic_available` feeds the ingest decider's image downgrade rule;
/// `degradation` demotes content-bearing modes to metadata-only under load.
pub fn read_file(
    path: &Path,
    registry: &Registry,
    degradation: DegradationMode,
    semantic_available: bool,
) -> Result<FileReadResult> {
    let path_str = path.to_string_lossy().to_string();

    let meta = std::fs::metadata(path).map_err(|e| unavailable(path, e))?;
    let size = meta.len();
    let mod_time = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0);

    let mut file = File::open(path).map_err(|e| unavailable(path, e))?;
    let mut head = vec![0u8; HEAD_PEEK_BYTES.min(size as usize)];
    let mut filled = 0;
    while filled < head.len() {
        let n = file.read(&mut head[filled..]).map_err(|e| unavailable(path, e))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    head.truncate(filled);

    let classification = classify(path, &head);
    let config = registry.effective_config(&path_str)?;
    let (mut mode, reason) = decide(classification.kind, &config, size, semantic_available);

    // Under metadata degradation, content-bearing work is shed per item.
    let mut degraded = false;
    if degradation == DegradationMode::Metadata && mode.needs_content() {
        mode = IngestMode::MetadataOnly;
        degraded = true;
    }

    // Hash content: in memory when the mode keeps it, streaming otherwise.
    let (content, hash) = if mode.needs_content() {
        let mut bytes = head;
        bytes.reserve(size.saturating_sub(bytes.len() as u64) as usize);
        file.read_to_end(&mut bytes).map_err(|e| unavailable(path, e))?;
        let hash = content_hash(&bytes);
        (Some(bytes), hash)
    } else {
        let mut hasher = ContentHasher::new();
        hasher.update(&head);
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf).map_err(|e| unavailable(path, e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        (None, hasher.finish())
    };

    debug!(
        path = %path.display(),
        kind = classification.kind.label(),
        mode = mode.label(),
        reason = reason,
        degraded = degraded,
        "file read"
    );

    Ok(FileReadResult {
        metadata_hash: metadata_hash(&path_str, size, mod_time),
        path: path_str,
        size,
        mod_time,
        kind: classification.kind,
        mime: classification.mime,
        language: classification.language,
        mode,
        reason: reason.to_string(),
        degraded,
        content,
        content_hash: hash,
    })
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
    fn text_file_is_read_with_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.txt");
        std::fs::write(&path, "hello registry").unwrap();

        let result =
            read_file(&path, &registry(), DegradationMode::Full, true).unwrap();
        assert_eq!(result.mode, IngestMode::Chunk);
        assert_eq!(result.kind, FileKind::Text);
        assert_eq!(result.content.as_deref(), Some("hello registry".as_bytes()));
        assert_eq!(result.content_hash, content_hash(b"hello registry"));
        assert!(!result.degraded);
    }

    #[test]
    fn metadata_mode_streams_hash_without_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.zip");
        std::fs::write(&path, b"PK\x03\x04 not really a zip").unwrap();

        let result =
            read_file(&path, &registry(), DegradationMode::Full, true).unwrap();
        assert_eq!(result.mode, IngestMode::MetadataOnly);
        assert_eq!(result.reason, "archive");
        assert!(result.content.is_none());
        // Streamed hash still covers the whole file.
        assert_eq!(result.content_hash, content_hash(b"PK\x03\x04 not really a zip"));
    }

    #[test]
    fn metadata_degradation_demotes_chunk_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "text").unwrap();

        let result =
            read_file(&path, &registry(), DegradationMode::Metadata, true).unwrap();
        assert_eq!(result.mode, IngestMode::MetadataOnly);
        assert!(result.degraded);
        assert!(result.content.is_none());
    }

    #[test]
    fn missing_file_is_file_unavailable() {
        let err = read_file(
            Path::new("/definitely/not/here.txt"),
            &registry(),
            DegradationMode::Full,
            true,
        )
        .unwrap_err();
        assert!(matches!(err, Error::FileUnavailable(_)));
    }

    #[test]
    fn head_larger_than_file_is_handled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.txt");
        std::fs::write(&path, "ab").unwrap();

        let result =
            read_file(&path, &registry(), DegradationMode::Full, true).unwrap();
        assert_eq!(result.size, 2);
        assert_eq!(result.content_hash, content_hash(b"ab"));
    }
}
