//! Embeddings provider seam and vector helpers.

use crate::error::Result;
use async_trait::async_trait;
use mnemo_core::AnalyzedChunk;

#[derive(Debug, Clone, PartialEq)]
pub struct IndexedEmbedding {
    pub index: usize,
    pub vector: Vec<f32>,
}

#[async_trait]
pub trait EmbeddingsProvider: Send + Sync {
    async fn embed(&self, content: &str) -> Result<Vec<f32>>;
    /// Batch variant; results carry the index of the input they belong to.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<IndexedEmbedding>>;
    fn available(&self) -> bool;
    fn dimensions(&self) -> usize;
    fn max_tokens(&self) -> usize;
    /// (provider, model) identify chunk-embedding nodes in the graph.
    fn provider_name(&self) -> &str;
    fn model_name(&self) -> &str;
}

/// Component-wise average over the chunk embeddings that exist. `None` when
/// no chunk carries a vector.
pub fn average_embedding(chunks: &[AnalyzedChunk]) -> Option<Vec<f32>> {
    let vectors: Vec<&Vec<f32>> = chunks.iter().filter_map(|c| c.embedding.as_ref()).collect();
    let first = vectors.first()?;
    let dim = first.len();

    let mut sum = vec![0.0f32; dim];
    let mut count = 0usize;
    for v in &vectors {
        if v.len() != dim {
            continue;
        }
        for (acc, x) in sum.iter_mut().zip(v.iter()) {
            *acc += x;
        }
        count += 1;
    }
    if count == 0 {
        return None;
    }
    for x in &mut sum {
        *x /= count as f32;
    }
    Some(sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_core::{Chunk, ChunkMetadata, ChunkType};

    fn chunk_with(embedding: Option<Vec<f32>>) -> AnalyzedChunk {
        AnalyzedChunk {
            chunk: Chunk {
                index: 0,
                content: "c".into(),
                start_offset: 0,
                end_offset: 1,
                chunk_type: ChunkType::Text,
                token_estimate: 1,
                metadata: ChunkMetadata::None,
            },
            content_hash: "h".into(),
            embedding,
            summary: None,
        }
    }

    #[test]
    fn average_over_present_vectors() {
        let chunks = vec![
            chunk_with(Some(vec![0.0, 2.0])),
            chunk_with(None),
            chunk_with(Some(vec![2.0, 4.0])),
        ];
        assert_eq!(average_embedding(&chunks), Some(vec![1.0, 3.0]));
    }

    #[test]
    fn no_vectors_yields_none() {
        assert_eq!(average_embedding(&[chunk_with(None)]), None);
        assert_eq!(average_embedding(&[]), None);
    }

    #[test]
    fn mismatched_dimensions_are_skipped() {
        let chunks = vec![
            chunk_with(Some(vec![1.0, 1.0])),
            chunk_with(Some(vec![9.0])),
            chunk_with(Some(vec![3.0, 3.0])),
        ];
        assert_eq!(average_embedding(&chunks), Some(vec![2.0, 2.0]));
    }
}
