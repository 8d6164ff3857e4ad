//! Content chunking: trait, registry, and the three in-tree chunkers.
//!
//! The code chunker parses the whole file with a tree-sitter grammar chosen
//! by the language strategy registry and emits chunks in source order: a
//! leading header chunk (package/import/use/preprocessor directives), then
//! one chunk per outermost chunkable node. Oversized chunks are line-split
//! greedily so no emitted chunk exceeds `max_chunk_size`.

use crate::error::{Error, Result};
use crate::strategies::{self, Strategy};
use mnemo_core::{
    Chunk, ChunkMetadata, ChunkType, Tokenizer, BytesEstimateTokenizer, DEFAULT_CHUNK_SIZE,
};
use std::sync::Arc;
use tracing::{debug, warn};
use tree_sitter::{Node, Parser};

// ---------------------------------------------------------------------------
// Options and outcome
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ChunkOptions {
    /// Upper bound on a chunk's byte length; 0 disables splitting.
    pub max_chunk_size: usize,
    pub tokenizer: Arc<dyn Tokenizer>,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self { max_chunk_size: DEFAULT_CHUNK_SIZE, tokenizer: Arc::new(BytesEstimateTokenizer) }
    }
}

/// Warning raised when a grammar reports syntax errors but chunks were still
/// extracted from the partial tree.
pub const PARSE_ERROR: &str = "PARSE_ERROR";

#[derive(Debug, Clone)]
pub struct ChunkOutcome {
    pub chunks: Vec<Chunk>,
    pub warnings: Vec<String>,
    pub chunker: &'static str,
}

// ---------------------------------------------------------------------------
// Trait and registry
// ---------------------------------------------------------------------------

pub trait Chunker: Send + Sync {
    fn name(&self) -> &'static str;
    fn can_handle(&self, mime: &str, language: Option<&str>) -> bool;
    fn chunk(
        &self,
        content: &str,
        mime: &str,
        language: Option<&str>,
        opts: &ChunkOptions,
    ) -> Result<ChunkOutcome>;
}

/// Ordered chunker registry; the first chunker claiming (mime, language)
/// wins, with the plain-text chunker registered last as the catch-all.
pub struct ChunkerRegistry {
    chunkers: Vec<Arc<dyn Chunker>>,
}

impl ChunkerRegistry {
    pub fn new(chunkers: Vec<Arc<dyn Chunker>>) -> Self {
        Self { chunkers }
    }

    /// Code, markdown, then plain text fallback.
    pub fn standard() -> Self {
        Self::new(vec![
            Arc::new(CodeChunker),
            Arc::new(MarkdownChunker),
            Arc::new(TextChunker),
        ])
    }

    pub fn resolve(&self, mime: &str, language: Option<&str>) -> Option<Arc<dyn Chunker>> {
        self.chunkers.iter().find(|c| c.can_handle(mime, language)).cloned()
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn make_chunk(
    content: &str,
    start: usize,
    end: usize,
    chunk_type: ChunkType,
    metadata: ChunkMetadata,
    opts: &ChunkOptions,
) -> Chunk {
    Chunk {
        index: 0, // assigned at emission order, after splitting
        token_estimate: opts.tokenizer.count_tokens(content),
        content: content.to_string(),
        start_offset: start,
        end_offset: end,
        chunk_type,
        metadata,
    }
}

/// Greedy line-splitting: lines are appended while the buffer stays within
/// `max`; oversized single lines are hard-split at char boundaries so the
/// size bound holds unconditionally.
fn split_oversize(chunk: Chunk, max: usize, opts: &ChunkOptions) -> Vec<Chunk> {
    if max == 0 || chunk.content.len() <= max {
        return vec![chunk];
    }

    fn flush(
        out: &mut Vec<Chunk>,
        buffer: &mut String,
        buffer_start: &mut usize,
        cursor: usize,
        template: &Chunk,
        opts: &ChunkOptions,
    ) {
        if buffer.is_empty() {
            return;
        }
        out.push(make_chunk(
            buffer,
            *buffer_start,
            cursor,
            template.chunk_type,
            template.metadata.clone(),
            opts,
        ));
        buffer.clear();
        *buffer_start = cursor;
    }

    let mut out = Vec::new();
    let mut buffer = String::new();
    let mut buffer_start = chunk.start_offset;
    let mut cursor = chunk.start_offset;

    for line in chunk.content.split_inclusive('\n') {
        if line.len() > max {
            // A single pathological line: flush, then hard-split the line.
            flush(&mut out, &mut buffer, &mut buffer_start, cursor, &chunk, opts);
            let mut rest = line;
            while !rest.is_empty() {
                let mut take = max.min(rest.len());
                while !rest.is_char_boundary(take) {
                    take -= 1;
                }
                let piece = &rest[..take];
                out.push(make_chunk(
                    piece,
                    cursor,
                    cursor + take,
                    chunk.chunk_type,
                    chunk.metadata.clone(),
                    opts,
                ));
                cursor += take;
                rest = &rest[take..];
            }
            buffer_start = cursor;
            continue;
        }
        if buffer.len() + line.len() > max {
            flush(&mut out, &mut buffer, &mut buffer_start, cursor, &chunk, opts);
        }
        buffer.push_str(line);
        cursor += line.len();
    }
    flush(&mut out, &mut buffer, &mut buffer_start, cursor, &chunk, opts);
    out
}

fn finish(mut chunks: Vec<Chunk>, warnings: Vec<String>, chunker: &'static str) -> ChunkOutcome {
    for (i, chunk) in chunks.iter_mut().enumerate() {
        chunk.index = i;
    }
    ChunkOutcome { chunks, warnings, chunker }
}

// ---------------------------------------------------------------------------
// Code chunker
// ---------------------------------------------------------------------------

pub struct CodeChunker;

impl Chunker for CodeChunker {
    fn name(&self) -> &'static str {
        "code"
    }

    fn can_handle(&self, mime: &str, language: Option<&str>) -> bool {
        strategies::resolve(mime, language, "").is_some()
    }

    fn chunk(
        &self,
        content: &str,
        mime: &str,
        language: Option<&str>,
        opts: &ChunkOptions,
    ) -> Result<ChunkOutcome> {
        let strategy = strategies::resolve(mime, language, "")
            .ok_or_else(|| Error::Chunker(format!("no strategy for language {language:?}")))?;
        chunk_code(content, strategy, opts)
    }
}

/// Collect outermost chunkable nodes in source order: a chunkable node is
/// emitted and not descended into, so nested candidates are owned by it.
fn collect_chunkable<'t>(node: Node<'t>, strategy: &Strategy, out: &mut Vec<Node<'t>>) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if strategy.should_chunk(&child) {
            out.push(child);
        } else {
            collect_chunkable(child, strategy, out);
        }
    }
}

fn chunk_code(content: &str, strategy: &Strategy, opts: &ChunkOptions) -> Result<ChunkOutcome> {
    let mut parser = Parser::new();
    parser
        .set_language(&(strategy.grammar)())
        .map_err(|e| Error::Chunker(format!("grammar load failed for {}: {e}", strategy.language)))?;
    let tree = parser
        .parse(content, None)
        .ok_or_else(|| Error::Chunker(format!("{} parse returned no tree", strategy.language)))?;
    let root = tree.root_node();
    let source = content.as_bytes();

    let mut warnings = Vec::new();
    if root.has_error() {
        warn!(language = strategy.language, "syntax errors in parse; emitting partial chunks");
        warnings.push(PARSE_ERROR.to_string());
    }

    // Header region: top-level directive nodes; the header chunk ends at the
    // byte after the last of them.
    let mut header_end = 0usize;
    {
        let mut cursor = root.walk();
        for child in root.children(&mut cursor) {
            if strategy.is_header(&child) {
                header_end = header_end.max(child.end_byte());
            }
        }
    }

    let mut raw: Vec<Chunk> = Vec::new();
    if header_end > 0 {
        raw.push(make_chunk(
            &content[..header_end],
            0,
            header_end,
            ChunkType::Code,
            ChunkMetadata::Code(mnemo_core::CodeMetadata {
                language: strategy.language.to_string(),
                ..Default::default()
            }),
            opts,
        ));
    }

    let mut candidates = Vec::new();
    collect_chunkable(root, strategy, &mut candidates);

    for node in candidates {
        let mut start = node.start_byte();
        let end = node.end_byte();
        // Candidates overlapping the header are clamped to its end; clamping
        // that empties a chunk drops it.
        if start < header_end {
            start = header_end;
        }
        if start >= end {
            continue;
        }
        let metadata = strategy.extract_metadata(&node, source);
        raw.push(make_chunk(
            &content[start..end],
            start,
            end,
            ChunkType::Code,
            ChunkMetadata::Code(metadata),
            opts,
        ));
    }

    // Unstructured or empty extraction: the whole file is one chunk.
    if raw.is_empty() && !content.is_empty() {
        raw.push(make_chunk(
            content,
            0,
            content.len(),
            ChunkType::Code,
            ChunkMetadata::Code(mnemo_core::CodeMetadata {
                language: strategy.language.to_string(),
                ..Default::default()
            }),
            opts,
        ));
    }

    let chunks: Vec<Chunk> = raw
        .into_iter()
        .flat_map(|c| split_oversize(c, opts.max_chunk_size, opts))
        .collect();

    debug!(language = strategy.language, chunks = chunks.len(), "code chunking complete");
    Ok(finish(chunks, warnings, "code"))
}

// ---------------------------------------------------------------------------
// Markdown chunker
// ---------------------------------------------------------------------------

/// Splits on ATX headings; each section carries its heading and level.
pub struct MarkdownChunker;

impl Chunker for MarkdownChunker {
    fn name(&self) -> &'static str {
        "markdown"
    }

    fn can_handle(&self, mime: &str, _language: Option<&str>) -> bool {
        mime == "text/markdown"
    }

    fn chunk(
        &self,
        content: &str,
        _mime: &str,
        _language: Option<&str>,
        opts: &ChunkOptions,
    ) -> Result<ChunkOutcome> {
        let mut sections: Vec<(usize, Option<String>, Option<u32>)> = Vec::new();
        let mut offset = 0usize;
        let mut in_fence = false;

        for line in content.split_inclusive('\n') {
            let trimmed = line.trim_start();
            if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
                in_fence = !in_fence;
            }
            if !in_fence && trimmed.starts_with('#') {
                let level = trimmed.chars().take_while(|&c| c == '#').count() as u32;
                if (1..=6).contains(&level)
                    && trimmed.chars().nth(level as usize).map_or(true, |c| c == ' ')
                {
                    let heading =
                        trimmed[level as usize..].trim().trim_end_matches('#').trim().to_string();
                    sections.push((offset, Some(heading), Some(level)));
                }
            }
            offset += line.len();
        }

        // Preamble before the first heading.
        if sections.first().map(|(o, _, _)| *o > 0).unwrap_or(false) {
            sections.insert(0, (0, None, None));
        }
        if sections.is_empty() && !content.is_empty() {
            sections.push((0, None, None));
        }

        let mut raw = Vec::new();
        for (i, (start, heading, level)) in sections.iter().enumerate() {
            let end = sections.get(i + 1).map(|(o, _, _)| *o).unwrap_or(content.len());
            if *start >= end {
                continue;
            }
            let body = &content[*start..end];
            if body.trim().is_empty() {
                continue;
            }
            raw.push(make_chunk(
                body,
                *start,
                end,
                ChunkType::Markdown,
                ChunkMetadata::Document(mnemo_core::DocumentMetadata {
                    heading: heading.clone(),
                    heading_level: *level,
                    page_count: None,
                }),
                opts,
            ));
        }

        let chunks: Vec<Chunk> = raw
            .into_iter()
            .flat_map(|c| split_oversize(c, opts.max_chunk_size, opts))
            .collect();
        Ok(finish(chunks, Vec::new(), "markdown"))
    }
}

// ---------------------------------------------------------------------------
// Text chunker
// ---------------------------------------------------------------------------

/// Paragraph grouping: blank-line-separated runs packed up to the size cap.
pub struct TextChunker;

impl Chunker for TextChunker {
    fn name(&self) -> &'static str {
        "text"
    }

    fn can_handle(&self, _mime: &str, _language: Option<&str>) -> bool {
        true
    }

    fn chunk(
        &self,
        content: &str,
        _mime: &str,
        _language: Option<&str>,
        opts: &ChunkOptions,
    ) -> Result<ChunkOutcome> {
        if content.is_empty() {
            return Ok(finish(Vec::new(), Vec::new(), "text"));
        }

        let max = opts.max_chunk_size;
        let mut raw: Vec<Chunk> = Vec::new();
        let mut start = 0usize;
        let mut offset = 0usize;
        let mut blank_run = false;

        for line in content.split_inclusive('\n') {
            let is_blank = line.trim().is_empty();
            let boundary = blank_run && !is_blank;
            let over = max > 0 && offset - start >= max;
            if (boundary || over) && offset > start {
                raw.push(make_chunk(
                    &content[start..offset],
                    start,
                    offset,
                    ChunkType::Text,
                    ChunkMetadata::None,
                    opts,
                ));
                start = offset;
            }
            blank_run = is_blank;
            offset += line.len();
        }
        if offset > start {
            raw.push(make_chunk(
                &content[start..offset],
                start,
                offset,
                ChunkType::Text,
                ChunkMetadata::None,
                opts,
            ));
        }

        let chunks: Vec<Chunk> = raw
            .into_iter()
            .flat_map(|c| split_oversize(c, max, opts))
            .collect();
        Ok(finish(chunks, Vec::new(), "text"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
