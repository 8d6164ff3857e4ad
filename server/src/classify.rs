//! File classification and ingest routing.
//!
//! Classification is a pure function of (path, size, head bytes): MIME is
//! inferred from the extension first; extensionless or unknown extensions
//! fall back to content sniffing. The ingest decider then maps the kind plus
//! per-path configuration onto one of four ingest modes.

use crate::types::PathConfig;
use mnemo_core::{FileKind, IngestMode, MAX_CHUNK_BYTES};
use std::path::Path;

// ---------------------------------------------------------------------------
// Classification output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: FileKind,
    pub mime: String,
    pub language: Option<String>,
}

// ---------------------------------------------------------------------------
// Extension tables
// ---------------------------------------------------------------------------

/// Map a file extension to (kind, mime, language). The language is only set
/// for extensions a code chunker strategy might claim.
fn classify_extension(ext: &str) -> Option<(FileKind, &'static str, Option<&'static str>)> {
    let ext = ext.to_ascii_lowercase();
    let hit = match ext.as_str() {
        // Code
        "rs" => (FileKind::Text, "text/x-rust", Some("rust")),
        "go" => (FileKind::Text, "text/x-go", Some("go")),
        "py" | "pyi" => (FileKind::Text, "text/x-python", Some("python")),
        "js" | "mjs" | "cjs" | "jsx" => (FileKind::Text, "text/javascript", Some("javascript")),
        "ts" | "tsx" => (FileKind::Text, "text/typescript", Some("typescript")),
        "java" => (FileKind::Text, "text/x-java", Some("java")),
        "c" | "h" => (FileKind::Text, "text/x-c", Some("c")),
        "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => (FileKind::Text, "text/x-c++", Some("cpp")),
        // Plain text and markup
        "txt" | "log" | "rst" | "adoc" => (FileKind::Text, "text/plain", None),
        "md" | "markdown" => (FileKind::Text, "text/markdown", None),
        "html" | "htm" => (FileKind::Text, "text/html", None),
        "css" | "scss" | "less" => (FileKind::Text, "text/css", None),
        "sh" | "bash" | "zsh" => (FileKind::Text, "text/x-shellscript", None),
        // Structured data
        "json" => (FileKind::Structured, "application/json", None),
        "yaml" | "yml" => (FileKind::Structured, "application/yaml", None),
        "toml" => (FileKind::Structured, "application/toml", None),
        "xml" => (FileKind::Structured, "application/xml", None),
        "csv" => (FileKind::Structured, "text/csv", None),
        // Documents
        "pdf" => (FileKind::Document, "application/pdf", None),
        "doc" | "docx" => (FileKind::Document, "application/msword", None),
        "odt" => (FileKind::Document, "application/vnd.oasis.opendocument.text", None),
        // Images
        "png" => (FileKind::Image, "image/png", None),
        "jpg" | "jpeg" => (FileKind::Image, "image/jpeg", None),
        "gif" => (FileKind::Image, "image/gif", None),
        "webp" => (FileKind::Image, "image/webp", None),
        "svg" => (FileKind::Image, "image/svg+xml", None),
        "bmp" => (FileKind::Image, "image/bmp", None),
        // Archives
        "zip" => (FileKind::Archive, "application/zip", None),
        "tar" => (FileKind::Archive, "application/x-tar", None),
        "gz" | "tgz" => (FileKind::Archive, "application/gzip", None),
        "xz" => (FileKind::Archive, "application/x-xz", None),
        "zst" => (FileKind::Archive, "application/zstd", None),
        "7z" => (FileKind::Archive, "application/x-7z-compressed", None),
        // Media
        "mp3" | "flac" | "ogg" | "wav" => (FileKind::Media, "audio/mpeg", None),
        "mp4" | "mkv" | "mov" | "avi" | "webm" => (FileKind::Media, "video/mp4", None),
        // Known binary
        "so" | "dylib" | "dll" | "a" | "o" => (FileKind::Binary, "application/octet-stream", None),
        "wasm" => (FileKind::Binary, "application/wasm", None),
        "sqlite" | "db" => (FileKind::Binary, "application/vnd.sqlite3", None),
        _ => return None,
    };
    Some(hit)
}

// ---------------------------------------------------------------------------
// Content sniffing
// ---------------------------------------------------------------------------

/// Sniff magic bytes for files whose extension says nothing.
fn sniff_magic(head: &[u8]) -> Option<(FileKind, &'static str)> {
    if head.starts_with(b"\x89PNG\r\n\x1a\n") {
        return Some((FileKind::Image, "image/png"));
    }
    if head.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some((FileKind::Image, "image/jpeg"));
    }
    if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
        return Some((FileKind::Image, "image/gif"));
    }
    if head.starts_with(b"%PDF-") {
        return Some((FileKind::Document, "application/pdf"));
    }
    if head.starts_with(b"PK\x03\x04") || head.starts_with(b"PK\x05\x06") {
        return Some((FileKind::Archive, "application/zip"));
    }
    if head.starts_with(&[0x1F, 0x8B]) {
        return Some((FileKind::Archive, "application/gzip"));
    }
    if head.starts_with(b"\x7fELF") {
        return Some((FileKind::Binary, "application/octet-stream"));
    }
    if head.starts_with(b"SQLite format 3\0") {
        return Some((FileKind::Binary, "application/vnd.sqlite3"));
    }
    None
}

/// A head looks textual when it holds no NUL bytes and is valid UTF-8 up to
/// the last complete code point in the peek window.
fn head_is_text(head: &[u8]) -> bool {
    if head.contains(&0) {
        return false;
    }
    match std::str::from_utf8(head) {
        Ok(_) => true,
        // The peek may cut a multi-byte sequence at the window edge.
        Err(e) => e.valid_up_to() + 4 > head.len() && e.error_len().is_none(),
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Classify a file from its path and up to 4 KiB of head bytes.
pub fn classify(path: &Path, head: &[u8]) -> Classification {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    let (mut kind, mut mime, language) = match classify_extension(ext) {
        Some((kind, mime, language)) => (kind, mime.to_string(), language),
        None => match sniff_magic(head) {
            Some((kind, mime)) => (kind, mime.to_string(), None),
            None if head_is_text(head) && !head.is_empty() => {
                (FileKind::Text, "text/plain".to_string(), None)
            }
            None if head.is_empty() => (FileKind::Unknown, "application/octet-stream".into(), None),
            None => (FileKind::Binary, "application/octet-stream".to_string(), None),
        },
    };

    // Text-looking kinds whose head is actually binary get reclassified.
    // Documents are exempt: PDF and friends are binary containers that the
    // semantic input builder routes by their own rules.
    if matches!(kind, FileKind::Text | FileKind::Structured)
        && !head.is_empty()
        && !head_is_text(head)
    {
        kind = FileKind::Binary;
        mime = "application/octet-stream".to_string();
    }

    Classification { kind, mime, language: language.map(|l| l.to_string()) }
}

// ---------------------------------------------------------------------------
// Ingest decider
// ---------------------------------------------------------------------------

/// Map a classification onto an ingest mode and a stable reason string.
/// Rules apply in order; `semantic_available=false` downgrades image routes.
pub fn decide(
    kind: FileKind,
    config: &PathConfig,
    size: u64,
    semantic_available: bool,
) -> (IngestMode, &'static str) {
    if size > MAX_CHUNK_BYTES {
        return (IngestMode::MetadataOnly, "too_large");
    }
    match kind {
        FileKind::Text | FileKind::Structured | FileKind::Document => (IngestMode::Chunk, "text"),
        FileKind::Image => {
            if !config.use_vision {
                (IngestMode::MetadataOnly, "vision_disabled")
            } else if !semantic_available {
                (IngestMode::MetadataOnly, "semantic_disabled")
            } else {
                (IngestMode::SemanticOnly, "image")
            }
        }
        FileKind::Archive => (IngestMode::MetadataOnly, "archive"),
        FileKind::Media => (IngestMode::MetadataOnly, "media"),
        FileKind::Binary => (IngestMode::MetadataOnly, "binary"),
        FileKind::Unknown => (IngestMode::Skip, "unsupported"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
