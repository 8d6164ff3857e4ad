//! Test doubles for the provider seams.
//!
//! Used by the crate's own tests and the integration suite; kept in the
//! library so both can share one set of mocks.

use crate::embed::{EmbeddingsProvider, IndexedEmbedding};
use crate::error::{Error, Result};
use crate::semantic::{ProviderCapabilities, SemanticInput, SemanticProvider};
use async_trait::async_trait;
use mnemo_core::SemanticResult;
use std::sync::atomic::{AtomicUsize, Ordering};

// ---------------------------------------------------------------------------
// Semantic
// ---------------------------------------------------------------------------

/// Returns a fixed summary, or fails every call with a fixed error.
pub struct MockSemanticProvider {
    summary: String,
    error: Option<String>,
    capabilities: ProviderCapabilities,
    calls: AtomicUsize,
}

impl MockSemanticProvider {
    pub fn fixed(summary: &str) -> Self {
        Self {
            summary: summary.to_string(),
            error: None,
            capabilities: ProviderCapabilities {
                supports_images: true,
                supports_pdf: true,
                ..Default::default()
            },
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: &str) -> Self {
        Self { error: Some(error.to_string()), ..Self::fixed("") }
    }

    pub fn with_capabilities(mut self, capabilities: ProviderCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SemanticProvider for MockSemanticProvider {
    async fn analyze(&self, _input: SemanticInput) -> Result<SemanticResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.error {
            return Err(Error::Semantic(err.clone()));
        }
        Ok(SemanticResult {
            summary: self.summary.clone(),
            tags: vec!["mock".into()],
            topics: vec!["testing".into()],
            complexity: 1,
            keywords: vec!["mock".into()],
            ..Default::default()
        })
    }

    fn available(&self) -> bool {
        true
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities
    }

    fn model_name(&self) -> &str {
        "mock-semantic"
    }
}

// ---------------------------------------------------------------------------
// Embeddings
// ---------------------------------------------------------------------------

/// Returns the same vector for every input, or fails every call.
pub struct MockEmbeddingsProvider {
    vector: Vec<f32>,
    error: Option<String>,
    calls: AtomicUsize,
}

impl MockEmbeddingsProvider {
    pub fn fixed(vector: Vec<f32>) -> Self {
        Self { vector, error: None, calls: AtomicUsize::new(0) }
    }

    pub fn failing(error: &str) -> Self {
        Self { vector: Vec::new(), error: Some(error.to_string()), calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingsProvider for MockEmbeddingsProvider {
    async fn embed(&self, _content: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.error {
            Some(err) => Err(Error::Embeddings(err.clone())),
            None => Ok(self.vector.clone()),
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<IndexedEmbedding>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.error {
            Some(err) => Err(Error::Embeddings(err.clone())),
            None => Ok(texts
                .iter()
                .enumerate()
                .map(|(index, _)| IndexedEmbedding { index, vector: self.vector.clone() })
                .collect()),
        }
    }

    fn available(&self) -> bool {
        true
    }

    fn dimensions(&self) -> usize {
        self.vector.len()
    }

    fn max_tokens(&self) -> usize {
        8192
    }

    fn provider_name(&self) -> &str {
        "mock"
    }

    fn model_name(&self) -> &str {
        "mock-embed"
    }
}
