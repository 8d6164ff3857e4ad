//! Pluggable token counting for provider budget allocation.
//!
//! Provides a `Tokenizer` trait with a default `BytesEstimateTokenizer`
//! (bytes/4 heuristic, no dependencies). Provider adapters that know their
//! real tokenizer can supply their own implementation.

use std::sync::Arc;

pub trait Tokenizer: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
    fn name(&self) -> &str;
}

/// Default: bytes/4 estimation (fast, no dependencies).
pub struct BytesEstimateTokenizer;

impl Tokenizer for BytesEstimateTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        text.len().div_ceil(4)
    }
    fn name(&self) -> &str {
        "bytes-estimate"
    }
}

/// Create a tokenizer by name. Falls back to bytes-estimate for unknown names.
pub fn create_tokenizer(_name: &str) -> Arc<dyn Tokenizer> {
    Arc::new(BytesEstimateTokenizer)
}
