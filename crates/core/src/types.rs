//! Core types shared across the mnemod server: work items, classification
//! output, chunks and their typed metadata, semantic results, and the final
//! analysis result persisted to the graph.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Files larger than this are never read into memory for chunking.
pub const MAX_CHUNK_BYTES: u64 = 100 * 1024 * 1024;

/// Default maximum chunk size in bytes (code and text chunkers).
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Bytes read from the head of a file for classification.
pub const HEAD_PEEK_BYTES: usize = 4096;

/// Output tokens reserved out of a semantic provider's input window.
pub const RESERVED_OUTPUT_TOKENS: usize = 4096;

// ---------------------------------------------------------------------------
// Work items
// ---------------------------------------------------------------------------

/// Why a file entered the work queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkKind {
    New,
    Changed,
    Reanalyze,
}

/// One unit of work: a file to analyze. Created on a bus event, destroyed on
/// success or permanent failure; only `retries` is ever mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub path: String,
    pub size: u64,
    /// Modification time, unix nanoseconds.
    pub mod_time: i64,
    pub kind: WorkKind,
    pub retries: u32,
}

impl WorkItem {
    pub fn new(path: impl Into<String>, size: u64, mod_time: i64, kind: WorkKind) -> Self {
        Self { path: path.into(), size, mod_time, kind, retries: 0 }
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Coarse file kind derived from extension and head bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Text,
    Structured,
    Document,
    Image,
    Archive,
    Media,
    Binary,
    Unknown,
}

impl FileKind {
    pub fn label(&self) -> &'static str {
        match self {
            FileKind::Text => "text",
            FileKind::Structured => "structured",
            FileKind::Document => "document",
            FileKind::Image => "image",
            FileKind::Archive => "archive",
            FileKind::Media => "media",
            FileKind::Binary => "binary",
            FileKind::Unknown => "unknown",
        }
    }
}

/// Per-file routing decision made by the ingest decider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestMode {
    Chunk,
    MetadataOnly,
    SemanticOnly,
    Skip,
}

impl IngestMode {
    /// True when the full file content must be held in memory.
    pub fn needs_content(&self) -> bool {
        matches!(self, IngestMode::Chunk | IngestMode::SemanticOnly)
    }

    pub fn label(&self) -> &'static str {
        match self {
            IngestMode::Chunk => "chunk",
            IngestMode::MetadataOnly => "metadata_only",
            IngestMode::SemanticOnly => "semantic_only",
            IngestMode::Skip => "skip",
        }
    }
}

// ---------------------------------------------------------------------------
// Chunks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Code,
    Markdown,
    Text,
    Other,
}

/// Typed metadata extracted for a code chunk by a language strategy.
/// Every field is optional; strategies fill what the AST offers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeMetadata {
    pub language: String,
    pub function_name: Option<String>,
    pub class_name: Option<String>,
    pub namespace: Option<String>,
    pub signature: Option<String>,
    pub parameters: Vec<String>,
    pub return_type: Option<String>,
    pub visibility: Option<String>,
    pub is_exported: bool,
    pub is_static: bool,
    pub is_async: bool,
    pub is_generator: bool,
    pub is_getter: bool,
    pub is_setter: bool,
    pub is_constructor: bool,
    pub docstring: Option<String>,
    pub decorators: Vec<String>,
    pub parent_class: Option<String>,
    pub implements: Vec<String>,
}

/// Typed metadata for a document chunk (markdown sections, PDFs).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub heading: Option<String>,
    pub heading_level: Option<u32>,
    pub page_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChunkMetadata {
    Code(CodeMetadata),
    Document(DocumentMetadata),
    None,
}

impl Default for ChunkMetadata {
    fn default() -> Self {
        ChunkMetadata::None
    }
}

/// A contiguous byte span of a file treated as a unit for persistence and
/// embedding. Indices are dense, 0-based, and follow byte order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub content: String,
    pub start_offset: usize,
    /// Exclusive.
    pub end_offset: usize,
    pub chunk_type: ChunkType,
    pub token_estimate: usize,
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

/// A chunk after analysis: its own content hash (graph identity) plus the
/// optional embedding and summary obtained from providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzedChunk {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub content_hash: String,
    pub embedding: Option<Vec<f32>>,
    pub summary: Option<String>,
}

// ---------------------------------------------------------------------------
// Semantic results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    File,
    Url,
    Symbol,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(rename = "type")]
    pub ref_type: ReferenceType,
    pub target: String,
}

/// Output of the semantic provider for one file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SemanticResult {
    pub summary: String,
    pub tags: Vec<String>,
    pub topics: Vec<String>,
    pub entities: Vec<Entity>,
    pub references: Vec<Reference>,
    pub complexity: u32,
    pub keywords: Vec<String>,
}

// ---------------------------------------------------------------------------
// Analysis result
// ---------------------------------------------------------------------------

/// The complete outcome of analyzing one file. Serialized as opaque JSON when
/// buffered in the durable persistence queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub path: String,
    pub size: u64,
    /// Unix nanoseconds.
    pub mod_time: i64,
    pub content_hash: String,
    pub metadata_hash: String,
    pub mime: String,
    pub language: Option<String>,
    pub kind: FileKind,
    pub ingest_mode: IngestMode,
    pub ingest_reason: String,
    pub semantic: Option<SemanticResult>,
    /// Average of all chunk embeddings, when any were produced.
    pub file_embedding: Option<Vec<f32>>,
    pub chunks: Vec<AnalyzedChunk>,
    pub chunker_used: Option<String>,
    pub chunks_processed: usize,
    pub processing_ms: u64,
    /// Unix nanoseconds.
    pub analyzed_at: i64,
    pub analysis_version: String,
}

impl AnalysisResult {
    /// Which analysis actually completed, for outcome events.
    pub fn analysis_type(&self) -> AnalysisType {
        match (self.semantic.is_some(), self.chunks.iter().any(|c| c.embedding.is_some())) {
            (true, true) => AnalysisType::Full,
            (true, false) => AnalysisType::Semantic,
            (false, true) => AnalysisType::Embeddings,
            (false, false) => AnalysisType::Metadata,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    Full,
    Semantic,
    Embeddings,
    Metadata,
}

impl AnalysisType {
    pub fn label(&self) -> &'static str {
        match self {
            AnalysisType::Full => "full",
            AnalysisType::Semantic => "semantic",
            AnalysisType::Embeddings => "embeddings",
            AnalysisType::Metadata => "metadata",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
