//! Graph persistence with durable fallback.
//!
//! A connected graph gets a clean-slate rewrite: upsert the file node, drop
//! old chunks, re-upsert every chunk plus its embedding, then replace the
//! tag/topic/entity/reference sets. A disconnected graph, or a failure in a
//! whole-file step, routes the serialized result into the durable queue.

use crate::dpq::PersistenceQueue;
use crate::error::{Error, Result};
use crate::graph::{FileNode, GraphStore};
use mnemo_core::{AnalysisResult, IngestMode};
use tracing::{debug, warn};

/// Where one persistence attempt ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Written to the graph.
    Persisted,
    /// Graph unavailable or failing; buffered durably for the drain worker.
    Buffered,
    /// `skip` mode: the file node was deleted instead.
    Deleted,
}

fn file_node(result: &AnalysisResult) -> FileNode {
    FileNode {
        path: result.path.clone(),
        size: result.size,
        mod_time: result.mod_time,
        content_hash: result.content_hash.clone(),
        metadata_hash: result.metadata_hash.clone(),
        mime: result.mime.clone(),
        language: result.language.clone(),
        kind: result.kind.label().to_string(),
        ingest_mode: result.ingest_mode.label().to_string(),
        ingest_reason: result.ingest_reason.clone(),
        summary: result.semantic.as_ref().map(|s| s.summary.clone()),
        complexity: result.semantic.as_ref().map(|s| s.complexity),
        keywords: result.semantic.as_ref().map(|s| s.keywords.clone()).unwrap_or_default(),
        file_embedding: result.file_embedding.clone(),
        analysis_version: result.analysis_version.clone(),
        analyzed_at: result.analyzed_at,
    }
}

/// Persist one analysis result, falling back to the durable queue.
///
/// `embedding_provider`/`embedding_model` key chunk-embedding nodes; they are
/// only consulted for chunks that actually carry vectors.
pub async fn persist_result(
    graph: &dyn GraphStore,
    dpq: &PersistenceQueue,
    result: &AnalysisResult,
    embedding_provider: Option<(&str, &str)>,
) -> Result<PersistOutcome> {
    if !graph.is_connected() {
        debug!(path = %result.path, "graph disconnected, buffering result");
        return buffer(dpq, result, Error::Graph("graph disconnected".into())).map(|_| PersistOutcome::Buffered);
    }

    match apply_to_graph(graph, result, embedding_provider).await {
        Ok(outcome) => Ok(outcome),
        // Invariant violations are programming errors, not outages.
        Err(err @ Error::State(_)) => Err(err),
        Err(err) => {
            warn!(path = %result.path, error = %err, "graph write failed, buffering result");
            buffer(dpq, result, err).map(|_| PersistOutcome::Buffered)
        }
    }
}

/// The graph write itself, without the durable fallback. The drain worker
/// calls this directly so a second outage surfaces as an error rather than
/// a re-enqueue.
pub async fn apply_to_graph(
    graph: &dyn GraphStore,
    result: &AnalysisResult,
    embedding_provider: Option<(&str, &str)>,
) -> Result<PersistOutcome> {
    // Skipped files are removed from the graph entirely.
    if result.ingest_mode == IngestMode::Skip {
        graph.delete_file(&result.path).await?;
        return Ok(PersistOutcome::Deleted);
    }

    if result.content_hash.is_empty() {
        return Err(Error::State(format!("{}: empty content hash at persistence", result.path)));
    }

    graph.upsert_file(&file_node(result)).await?;
    graph.delete_chunks(&result.path).await?;

    for chunk in &result.chunks {
        // Per-chunk failures are logged and skipped; the embedding for a
        // failed chunk is skipped with it.
        if let Err(err) = graph.upsert_chunk(&result.path, chunk).await {
            warn!(
                path = %result.path,
                chunk = chunk.chunk.index,
                error = %err,
                "chunk upsert failed, skipping chunk"
            );
            continue;
        }
        if let (Some(vector), Some((provider, model))) =
            (chunk.embedding.as_deref(), embedding_provider)
        {
            if let Err(err) = graph
                .upsert_chunk_embedding(&chunk.content_hash, provider, model, vector)
                .await
            {
                warn!(
                    path = %result.path,
                    chunk = chunk.chunk.index,
                    error = %err,
                    "chunk embedding upsert failed, skipping embedding"
                );
            }
        }
    }

    if let Some(semantic) = &result.semantic {
        graph.set_file_tags(&result.path, &semantic.tags).await?;
        graph.set_file_topics(&result.path, &semantic.topics).await?;
        graph.set_file_entities(&result.path, &semantic.entities).await?;
        graph.set_file_references(&result.path, &semantic.references).await?;
    }

    debug!(path = %result.path, chunks = result.chunks.len(), "result persisted to graph");
    Ok(PersistOutcome::Persisted)
}

/// Serialize the whole result into the durable queue. A queue failure on top
/// of the graph failure surfaces both.
fn buffer(dpq: &PersistenceQueue, result: &AnalysisResult, graph_err: Error) -> Result<()> {
    let json = serde_json::to_string(result)?;
    match dpq.enqueue(&result.path, &result.content_hash, &json) {
        Ok(_) => Ok(()),
        Err(queue_err) => Err(Error::PersistenceLost {
            graph: graph_err.to_string(),
            queue: queue_err.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::graph::MemoryGraph;
    use mnemo_core::{
        AnalyzedChunk, Chunk, ChunkMetadata, ChunkType, FileKind, SemanticResult,
    };

    fn dpq() -> PersistenceQueue {
        PersistenceQueue::new(db::open_in_memory().unwrap())
    }

    fn result_with_chunks(path: &str, mode: IngestMode) -> AnalysisResult {
        let chunk = |i: usize, hash: &str, emb: Option<Vec<f32>>| AnalyzedChunk {
            chunk: Chunk {
                index: i,
                content: format!("chunk {i}"),
                start_offset: i * 10,
                end_offset: i * 10 + 7,
                chunk_type: ChunkType::Text,
                token_estimate: 2,
                metadata: ChunkMetadata::None,
            },
            content_hash: hash.into(),
            embedding: emb,
            summary: None,
        };
        AnalysisResult {
            path: path.into(),
            size: 20,
            mod_time: 1,
            content_hash: "filehash".into(),
            metadata_hash: "metahash".into(),
            mime: "text/plain".into(),
            language: None,
            kind: FileKind::Text,
            ingest_mode: mode,
            ingest_reason: "text".into(),
            semantic: Some(SemanticResult {
                summary: "sum".into(),
                tags: vec!["tag".into()],
                ..Default::default()
            }),
            file_embedding: Some(vec![0.1]),
            chunks: vec![
                chunk(0, "c0", Some(vec![0.1, 0.2])),
                chunk(1, "c1", None),
            ],
            chunker_used: Some("text".into()),
            chunks_processed: 2,
            processing_ms: 1,
            analyzed_at: 2,
            analysis_version: "v".into(),
        }
    }

    #[tokio::test]
    async fn connected_graph_gets_full_write() {
        let graph = MemoryGraph::new(true);
        let q = dpq();
        let result = result_with_chunks("/a", IngestMode::Chunk);

        let outcome =
            persist_result(&graph, &q, &result, Some(("mock", "mock-embed"))).await.unwrap();
        assert_eq!(outcome, PersistOutcome::Persisted);
        assert!(graph.file("/a").is_some());
        assert_eq!(graph.chunk_count("/a"), 2);
        assert_eq!(graph.embedding("c0", "mock", "mock-embed"), Some(vec![0.1, 0.2]));
        assert!(graph.embedding("c1", "mock", "mock-embed").is_none());
        assert_eq!(graph.tags("/a"), vec!["tag".to_string()]);
        assert_eq!(q.stats().unwrap().pending, 0);
    }

    #[tokio::test]
    async fn disconnected_graph_buffers_serialized_result() {
        let graph = MemoryGraph::new(false);
        let q = dpq();
        let result = result_with_chunks("/a", IngestMode::Chunk);

        let outcome = persist_result(&graph, &q, &result, None).await.unwrap();
        assert_eq!(outcome, PersistOutcome::Buffered);

        let stats = q.stats().unwrap();
        assert_eq!(stats.pending, 1);

        // The buffered payload round-trips to the original result.
        let batch = q.dequeue_batch(1).unwrap();
        let back: AnalysisResult = serde_json::from_str(&batch[0].result_json).unwrap();
        assert_eq!(back.path, "/a");
        assert_eq!(back.chunks.len(), 2);
    }

    #[tokio::test]
    async fn failing_write_buffers() {
        let graph = MemoryGraph::new(true);
        graph.set_fail_writes(true);
        let q = dpq();
        let result = result_with_chunks("/a", IngestMode::Chunk);

        let outcome = persist_result(&graph, &q, &result, None).await.unwrap();
        assert_eq!(outcome, PersistOutcome::Buffered);
        assert_eq!(q.stats().unwrap().pending, 1);
    }

    #[tokio::test]
    async fn skip_mode_deletes_file() {
        let graph = MemoryGraph::new(true);
        let q = dpq();

        // Seed a node, then persist a skip result for the same path.
        let seeded = result_with_chunks("/a", IngestMode::Chunk);
        persist_result(&graph, &q, &seeded, None).await.unwrap();
        assert!(graph.file("/a").is_some());

        let skip = result_with_chunks("/a", IngestMode::Skip);
        let outcome = persist_result(&graph, &q, &skip, None).await.unwrap();
        assert_eq!(outcome, PersistOutcome::Deleted);
        assert!(graph.file("/a").is_none());
    }

    #[tokio::test]
    async fn empty_content_hash_is_a_state_error() {
        let graph = MemoryGraph::new(true);
        let mut result = result_with_chunks("/a", IngestMode::Chunk);
        result.content_hash.clear();
        let err = apply_to_graph(&graph, &result, None).await.unwrap_err();
        assert!(matches!(err, Error::State(_)));
    }
}
