//! Semantic provider seam and the input builder that condenses a file into
//! a provider-sized request.
//!
//! Routing: images become image-bearing requests, PDFs go as raw bytes when
//! the provider can take them, everything else is text assembled from chunk
//! contents. Token budgeting keeps the request inside the provider's input
//! window minus a reserved output allowance.

use crate::error::{Error, Result};
use crate::reader::FileReadResult;
use async_trait::async_trait;
use mnemo_core::{
    Chunk, ChunkMetadata, SemanticResult, Tokenizer, FileKind, RESERVED_OUTPUT_TOKENS,
};

// ---------------------------------------------------------------------------
// Provider interface
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderCapabilities {
    pub max_input_tokens: usize,
    pub max_request_bytes: u64,
    pub max_pdf_pages: u32,
    pub max_images: u32,
    pub supports_pdf: bool,
    pub supports_images: bool,
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self {
            max_input_tokens: 200_000,
            max_request_bytes: 32 * 1024 * 1024,
            max_pdf_pages: 100,
            max_images: 1,
            supports_pdf: false,
            supports_images: false,
        }
    }
}

/// The typed request body sent to a provider.
#[derive(Debug, Clone, PartialEq)]
pub enum SemanticInputBody {
    Text(String),
    Image(Vec<u8>),
    Pdf(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct SemanticInput {
    pub body: SemanticInputBody,
    pub mime: String,
    pub path: String,
    pub token_estimate: Option<usize>,
    /// Set when text was condensed to fit the token budget.
    pub truncated: bool,
}

#[async_trait]
pub trait SemanticProvider: Send + Sync {
    async fn analyze(&self, input: SemanticInput) -> Result<SemanticResult>;
    fn available(&self) -> bool;
    fn capabilities(&self) -> ProviderCapabilities;
    fn model_name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Input builder
// ---------------------------------------------------------------------------

/// Literal marker inserted between the kept head and tail of condensed text.
const TRUNCATION_MARKER: &str = "\n\n[...truncated...]\n\n";

/// Build a provider-ready input from the file reader and chunker outputs.
pub fn build_input(
    read: &FileReadResult,
    chunks: &[Chunk],
    caps: &ProviderCapabilities,
    tokenizer: &dyn Tokenizer,
) -> Result<SemanticInput> {
    if read.kind == FileKind::Image {
        if !caps.supports_images {
            return Err(Error::Unavailable(format!(
                "provider cannot accept images for {}",
                read.path
            )));
        }
        let bytes = read.content.clone().unwrap_or_default();
        return Ok(SemanticInput {
            body: SemanticInputBody::Image(bytes),
            mime: read.mime.clone(),
            path: read.path.clone(),
            token_estimate: None,
            truncated: false,
        });
    }

    if read.mime == "application/pdf" {
        let pages = chunks
            .iter()
            .find_map(|c| match &c.metadata {
                ChunkMetadata::Document(d) => d.page_count,
                _ => None,
            })
            .unwrap_or(1);
        if caps.supports_pdf
            && read.size <= caps.max_request_bytes
            && pages <= caps.max_pdf_pages
        {
            if let Some(bytes) = &read.content {
                return Ok(SemanticInput {
                    body: SemanticInputBody::Pdf(bytes.clone()),
                    mime: read.mime.clone(),
                    path: read.path.clone(),
                    token_estimate: None,
                    truncated: false,
                });
            }
        }
        // Oversized or unsupported PDFs fall back to text from chunks.
    }

    // Text path: chunk contents joined by blank lines, else raw file content.
    let text = if chunks.is_empty() {
        String::from_utf8_lossy(read.content.as_deref().unwrap_or_default()).into_owned()
    } else {
        chunks.iter().map(|c| c.content.as_str()).collect::<Vec<_>>().join("\n\n")
    };

    let budget = caps.max_input_tokens.saturating_sub(RESERVED_OUTPUT_TOKENS);
    let (text, truncated) = condense(text, budget, tokenizer);
    let estimate = tokenizer.count_tokens(&text);

    Ok(SemanticInput {
        body: SemanticInputBody::Text(text),
        mime: read.mime.clone(),
        path: read.path.clone(),
        token_estimate: Some(estimate),
        truncated,
    })
}

/// Keep the first 70% and last 30% of the byte budget with a literal marker
/// between them when the text overflows the token budget.
fn condense(text: String, budget_tokens: usize, tokenizer: &dyn Tokenizer) -> (String, bool) {
    if tokenizer.count_tokens(&text) <= budget_tokens {
        return (text, false);
    }

    // Token budget back to bytes via the same estimate ratio.
    let byte_budget = budget_tokens.saturating_mul(4);
    let head_len = byte_budget.saturating_mul(7) / 10;
    let tail_len = byte_budget.saturating_sub(head_len);

    if byte_budget == 0 || head_len + tail_len >= text.len() {
        return (text, false);
    }

    let mut head_end = head_len.min(text.len());
    while head_end > 0 && !text.is_char_boundary(head_end) {
        head_end -= 1;
    }
    let mut tail_start = text.len().saturating_sub(tail_len);
    while tail_start < text.len() && !text.is_char_boundary(tail_start) {
        tail_start += 1;
    }

    let mut out = String::with_capacity(head_end + TRUNCATION_MARKER.len() + (text.len() - tail_start));
    out.push_str(&text[..head_end]);
    out.push_str(TRUNCATION_MARKER);
    out.push_str(&text[tail_start..]);
    (out, true)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_core::{BytesEstimateTokenizer, ChunkType, DocumentMetadata, IngestMode};

    fn read_result(kind: FileKind, mime: &str, content: Option<&[u8]>) -> FileReadResult {
        FileReadResult {
            path: "/f".into(),
            size: content.map(|c| c.len() as u64).unwrap_or(0),
            mod_time: 0,
            kind,
            mime: mime.into(),
            language: None,
            mode: IngestMode::Chunk,
            reason: "text".into(),
            degraded: false,
            content: content.map(|c| c.to_vec()),
            content_hash: "h".into(),
            metadata_hash: "m".into(),
        }
    }

    fn text_chunk(content: &str) -> Chunk {
        Chunk {
            index: 0,
            content: content.into(),
            start_offset: 0,
            end_offset: content.len(),
            chunk_type: ChunkType::Text,
            token_estimate: content.len().div_ceil(4),
            metadata: ChunkMetadata::None,
        }
    }

    #[test]
    fn image_requires_capability() {
        let read = read_result(FileKind::Image, "image/png", Some(b"\x89PNG"));
        let caps = ProviderCapabilities { supports_images: false, ..Default::default() };
        let err = build_input(&read, &[], &caps, &BytesEstimateTokenizer).unwrap_err();
        assert!(matches!(err, Error::Unavailable(_)));

        let caps = ProviderCapabilities { supports_images: true, ..Default::default() };
        let input = build_input(&read, &[], &caps, &BytesEstimateTokenizer).unwrap();
        assert!(matches!(input.body, SemanticInputBody::Image(_)));
    }

    #[test]
    fn pdf_within_limits_goes_as_bytes() {
        let read = read_result(FileKind::Document, "application/pdf", Some(b"%PDF-1.7 ..."));
        let caps = ProviderCapabilities { supports_pdf: true, ..Default::default() };
        let chunks = [Chunk {
            metadata: ChunkMetadata::Document(DocumentMetadata {
                heading: None,
                heading_level: None,
                page_count: Some(3),
            }),
            ..text_chunk("pdf text")
        }];
        let input = build_input(&read, &chunks, &caps, &BytesEstimateTokenizer).unwrap();
        assert!(matches!(input.body, SemanticInputBody::Pdf(_)));
    }

    #[test]
    fn pdf_over_page_limit_falls_back_to_chunk_text() {
        let read = read_result(FileKind::Document, "application/pdf", Some(b"%PDF-1.7 ..."));
        let caps =
            ProviderCapabilities { supports_pdf: true, max_pdf_pages: 2, ..Default::default() };
        let chunks = [Chunk {
            metadata: ChunkMetadata::Document(DocumentMetadata {
                heading: None,
                heading_level: None,
                page_count: Some(30),
            }),
            ..text_chunk("extracted pdf text")
        }];
        let input = build_input(&read, &chunks, &caps, &BytesEstimateTokenizer).unwrap();
        match input.body {
            SemanticInputBody::Text(t) => assert!(t.contains("extracted pdf text")),
            other => panic!("expected text fallback, got {other:?}"),
        }
    }

    #[test]
    fn text_joins_chunks_with_blank_lines() {
        let read = read_result(FileKind::Text, "text/plain", Some(b"raw"));
        let caps = ProviderCapabilities::default();
        let chunks = [text_chunk("first"), text_chunk("second")];
        let input = build_input(&read, &chunks, &caps, &BytesEstimateTokenizer).unwrap();
        match input.body {
            SemanticInputBody::Text(t) => assert_eq!(t, "first\n\nsecond"),
            other => panic!("expected text, got {other:?}"),
        }
        assert!(!input.truncated);
    }

    #[test]
    fn no_chunks_falls_back_to_file_content() {
        let read = read_result(FileKind::Text, "text/plain", Some(b"whole file body"));
        let input =
            build_input(&read, &[], &ProviderCapabilities::default(), &BytesEstimateTokenizer)
                .unwrap();
        match input.body {
            SemanticInputBody::Text(t) => assert_eq!(t, "whole file body"),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn overflow_condenses_with_marker_and_flag() {
        // Budget: 100 tokens usable => 400 bytes; text of 2000 bytes.
        let caps = ProviderCapabilities {
            max_input_tokens: RESERVED_OUTPUT_TOKENS + 100,
            ..Default::default()
        };
        let big = "a".repeat(2000);
        let read = read_result(FileKind::Text, "text/plain", Some(big.as_bytes()));
        let input =
            build_input(&read, &[], &caps, &BytesEstimateTokenizer).unwrap();

        assert!(input.truncated);
        match input.body {
            SemanticInputBody::Text(t) => {
                assert!(t.contains("[...truncated...]"));
                // 70% head + 30% tail of the 400-byte budget plus marker.
                assert!(t.len() <= 400 + TRUNCATION_MARKER.len());
            }
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn budget_clamps_at_zero() {
        let caps = ProviderCapabilities { max_input_tokens: 10, ..Default::default() };
        let read = read_result(FileKind::Text, "text/plain", Some(b"tiny"));
        // budget is 0 tokens; condense declines to produce empty output and
        // passes the text through.
        let input = build_input(&read, &[], &caps, &BytesEstimateTokenizer).unwrap();
        assert!(matches!(input.body, SemanticInputBody::Text(_)));
    }
}
