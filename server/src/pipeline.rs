//! The analysis pipeline: a linear accumulator run once per work item.
//!
//! Stages fire in order (file reader, chunker, semantic, embeddings) with
//! each stage's output landing on the `PipelineContext`. Metadata-only and
//! skip modes short-circuit after the reader; `semantic_only` skips chunking
//! and embeddings; embeddings run only under `full` degradation. Semantic
//! and embeddings failures are soft: the event is published, the registry
//! retry count bumped, and the pipeline continues with the field absent.

use crate::bus::EventBus;
use crate::chunker::{ChunkOptions, ChunkerRegistry};
use crate::embed::{average_embedding, EmbeddingsProvider};
use crate::error::{Error, Result};
use crate::reader::{self, FileReadResult};
use crate::registry::Registry;
use crate::semantic::{self, SemanticProvider};
use crate::types::{now_nanos, DegradationMode, Event};
use mnemo_core::{
    content_hash, AnalysisResult, AnalyzedChunk, Chunk, SemanticResult, Tokenizer, WorkItem,
    IngestMode,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Accumulator
// ---------------------------------------------------------------------------

/// Mutable accumulator carrying all stage outputs for one work item.
pub struct PipelineContext {
    pub item: WorkItem,
    pub degradation: DegradationMode,
    pub read: Option<FileReadResult>,
    pub chunks: Vec<Chunk>,
    pub warnings: Vec<String>,
    pub chunker_used: Option<String>,
    pub analyzed: Vec<AnalyzedChunk>,
    pub semantic: Option<SemanticResult>,
    pub file_embedding: Option<Vec<f32>>,
}

impl PipelineContext {
    pub fn new(item: WorkItem, degradation: DegradationMode) -> Self {
        Self {
            item,
            degradation,
            read: None,
            chunks: Vec::new(),
            warnings: Vec::new(),
            chunker_used: None,
            analyzed: Vec::new(),
            semantic: None,
            file_embedding: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline {
    pub registry: Registry,
    pub chunkers: ChunkerRegistry,
    pub semantic: Option<Arc<dyn SemanticProvider>>,
    pub embeddings: Option<Arc<dyn EmbeddingsProvider>>,
    pub tokenizer: Arc<dyn Tokenizer>,
    pub bus: EventBus,
    pub chunk_options: ChunkOptions,
    pub analysis_version: String,
}

impl Pipeline {
    fn semantic_available(&self) -> bool {
        self.semantic.as_ref().map(|p| p.available()).unwrap_or(false)
    }

    /// Run every applicable stage for one item and assemble the result.
    pub async fn run(&self, item: &WorkItem, degradation: DegradationMode) -> Result<AnalysisResult> {
        let started = Instant::now();
        let mut ctx = PipelineContext::new(item.clone(), degradation);

        self.read_stage(&mut ctx)?;
        let read = ctx.read.as_ref().expect("read stage always fills ctx.read");

        // Metadata synchronisation fires immediately after the reader: a
        // changed content hash clears stale analysis state transactionally.
        self.registry.sync_metadata(
            &read.path,
            &read.content_hash,
            &read.metadata_hash,
            read.size,
            read.mod_time,
            &self.analysis_version,
        )?;

        match read.mode {
            IngestMode::Skip | IngestMode::MetadataOnly => {
                debug!(path = %read.path, mode = read.mode.label(), "short-circuit after reader");
            }
            IngestMode::SemanticOnly => {
                self.semantic_stage(&mut ctx).await;
            }
            IngestMode::Chunk => {
                self.chunk_stage(&mut ctx)?;
                self.semantic_stage(&mut ctx).await;
                if ctx.degradation == DegradationMode::Full {
                    self.embeddings_stage(&mut ctx).await;
                } else {
                    debug!(
                        path = %ctx.read.as_ref().unwrap().path,
                        mode = ctx.degradation.label(),
                        "embeddings skipped under degradation"
                    );
                }
            }
        }

        Ok(self.assemble(ctx, started))
    }

    fn read_stage(&self, ctx: &mut PipelineContext) -> Result<()> {
        let read = reader::read_file(
            Path::new(&ctx.item.path),
            &self.registry,
            ctx.degradation,
            self.semantic_available(),
        )?;
        ctx.read = Some(read);
        Ok(())
    }

    fn chunk_stage(&self, ctx: &mut PipelineContext) -> Result<()> {
        let read = ctx.read.as_ref().expect("chunk stage runs after reader");
        let chunker = self
            .chunkers
            .resolve(&read.mime, read.language.as_deref())
            .ok_or_else(|| Error::Chunker(format!("no chunker for {}", read.mime)))?;

        // Binary document containers (PDF and friends) have no text chunker
        // in-tree; they go to the semantic stage whole instead of aborting.
        let content = match read.content_str() {
            Ok(content) => content,
            Err(err) if read.kind == mnemo_core::FileKind::Document => {
                warn!(path = %read.path, error = %err, "document is not chunkable text, skipping chunk stage");
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        let outcome =
            chunker.chunk(content, &read.mime, read.language.as_deref(), &self.chunk_options)?;

        debug!(
            path = %read.path,
            chunker = outcome.chunker,
            chunks = outcome.chunks.len(),
            warnings = outcome.warnings.len(),
            "chunking complete"
        );
        ctx.chunker_used = Some(outcome.chunker.to_string());
        ctx.warnings = outcome.warnings;
        // Chunk-level content hashes are assigned here; the hash is the
        // chunk's identity in the graph.
        ctx.analyzed = outcome
            .chunks
            .iter()
            .map(|c| AnalyzedChunk {
                content_hash: content_hash(c.content.as_bytes()),
                chunk: c.clone(),
                embedding: None,
                summary: None,
            })
            .collect();
        ctx.chunks = outcome.chunks;
        Ok(())
    }

    /// Soft stage: failure publishes an event and bumps the registry retry
    /// count, but never aborts the pipeline.
    async fn semantic_stage(&self, ctx: &mut PipelineContext) {
        let read = ctx.read.as_ref().expect("semantic stage runs after reader");
        let Some(provider) = &self.semantic else { return };
        if !provider.available() {
            debug!(path = %read.path, "semantic provider unavailable, skipping");
            return;
        }

        let result = match semantic::build_input(
            read,
            &ctx.chunks,
            &provider.capabilities(),
            self.tokenizer.as_ref(),
        ) {
            Ok(input) => provider.analyze(input).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(semantic) => {
                if let Err(err) = self.registry.semantic_success(&read.path) {
                    warn!(path = %read.path, error = %err, "semantic bookkeeping failed");
                }
                ctx.semantic = Some(semantic);
            }
            Err(err) => {
                warn!(path = %read.path, error = %err, "semantic analysis failed");
                if let Err(reg_err) = self.registry.semantic_failure(&read.path, &err.to_string()) {
                    warn!(path = %read.path, error = %reg_err, "semantic bookkeeping failed");
                }
                self.bus.publish(Event::SemanticAnalysisFailed {
                    path: read.path.clone(),
                    error: err.to_string(),
                });
            }
        }
    }

    /// Soft stage: embeds every chunk in one batch and averages the vectors.
    async fn embeddings_stage(&self, ctx: &mut PipelineContext) {
        let read = ctx.read.as_ref().expect("embeddings stage runs after reader");
        let Some(provider) = &self.embeddings else { return };
        if !provider.available() {
            debug!(path = %read.path, "embeddings provider unavailable, skipping");
            return;
        }
        if ctx.analyzed.is_empty() {
            return;
        }

        let texts: Vec<String> = ctx.analyzed.iter().map(|c| c.chunk.content.clone()).collect();
        match provider.embed_batch(&texts).await {
            Ok(embeddings) => {
                for emb in embeddings {
                    if let Some(chunk) = ctx.analyzed.get_mut(emb.index) {
                        chunk.embedding = Some(emb.vector);
                    }
                }
                ctx.file_embedding = average_embedding(&ctx.analyzed);
                if let Err(err) = self.registry.embeddings_success(&read.path) {
                    warn!(path = %read.path, error = %err, "embeddings bookkeeping failed");
                }
            }
            Err(err) => {
                warn!(path = %read.path, error = %err, "embeddings generation failed");
                if let Err(reg_err) =
                    self.registry.embeddings_failure(&read.path, &err.to_string())
                {
                    warn!(path = %read.path, error = %reg_err, "embeddings bookkeeping failed");
                }
                self.bus.publish(Event::EmbeddingsGenerationFailed {
                    path: read.path.clone(),
                    error: err.to_string(),
                });
            }
        }
    }

    fn assemble(&self, ctx: PipelineContext, started: Instant) -> AnalysisResult {
        let read = ctx.read.expect("assemble runs after reader");
        let chunks_processed = ctx.analyzed.len();
        AnalysisResult {
            path: read.path,
            size: read.size,
            mod_time: read.mod_time,
            content_hash: read.content_hash,
            metadata_hash: read.metadata_hash,
            mime: read.mime,
            language: read.language,
            kind: read.kind,
            ingest_mode: read.mode,
            ingest_reason: read.reason,
            semantic: ctx.semantic,
            file_embedding: ctx.file_embedding,
            chunks: ctx.analyzed,
            chunker_used: ctx.chunker_used,
            chunks_processed,
            processing_ms: started.elapsed().as_millis() as u64,
            analyzed_at: now_nanos(),
            analysis_version: self.analysis_version.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::semantic::{ProviderCapabilities, SemanticInput};
    use crate::testing::{MockEmbeddingsProvider, MockSemanticProvider};
    use mnemo_core::{BytesEstimateTokenizer, WorkKind};

    fn pipeline_with(
        semantic: Option<Arc<dyn SemanticProvider>>,
        embeddings: Option<Arc<dyn EmbeddingsProvider>>,
    ) -> Pipeline {
        Pipeline {
            registry: Registry::new(db::open_in_memory().unwrap()),
            chunkers: ChunkerRegistry::standard(),
            semantic,
            embeddings,
            tokenizer: Arc::new(BytesEstimateTokenizer),
            bus: EventBus::new(),
            chunk_options: ChunkOptions::default(),
            analysis_version: "test".into(),
        }
    }

    fn item(path: &std::path::Path) -> WorkItem {
        WorkItem::new(path.to_string_lossy(), 0, 0, WorkKind::New)
    }

    #[tokio::test]
    async fn chunk_mode_runs_all_stages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.txt");
        std::fs::write(&path, "hello registry").unwrap();

        let pipeline = pipeline_with(
            Some(Arc::new(MockSemanticProvider::fixed("a summary"))),
            Some(Arc::new(MockEmbeddingsProvider::fixed(vec![0.1, 0.2]))),
        );
        let result = pipeline.run(&item(&path), DegradationMode::Full).await.unwrap();

        assert_eq!(result.ingest_mode, IngestMode::Chunk);
        assert!(!result.chunks.is_empty());
        assert_eq!(result.semantic.as_ref().unwrap().summary, "a summary");
        assert_eq!(result.chunks[0].embedding.as_deref(), Some(&[0.1, 0.2][..]));
        assert_eq!(result.file_embedding.as_deref(), Some(&[0.1, 0.2][..]));
        assert_eq!(result.content_hash, content_hash(b"hello registry"));

        // Registry bookkeeping: all three stage timestamps set, no errors.
        let state = pipeline.registry.get(&result.path).unwrap().unwrap();
        assert!(state.metadata_analyzed_at.is_some());
        assert!(state.semantic_analyzed_at.is_some());
        assert!(state.embeddings_analyzed_at.is_some());
        assert!(state.semantic_error.is_none());
        assert!(state.embeddings_error.is_none());
    }

    #[tokio::test]
    async fn no_embed_degradation_chunks_without_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.txt");
        std::fs::write(&path, "first paragraph\n\nsecond paragraph\n").unwrap();

        let pipeline = pipeline_with(
            Some(Arc::new(MockSemanticProvider::fixed("s"))),
            Some(Arc::new(MockEmbeddingsProvider::fixed(vec![0.5]))),
        );
        let result = pipeline.run(&item(&path), DegradationMode::NoEmbed).await.unwrap();

        assert!(!result.chunks.is_empty());
        assert!(result.chunks.iter().all(|c| c.embedding.is_none()));
        assert!(result.file_embedding.is_none());
        assert!(result.semantic.is_some());
    }

    #[tokio::test]
    async fn semantic_failure_is_soft_and_published() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "body").unwrap();

        let pipeline = pipeline_with(
            Some(Arc::new(MockSemanticProvider::failing("rate limited"))),
            None,
        );
        let mut failures = pipeline.bus.subscribe(crate::types::Topic::SemanticAnalysisFailed);

        let result = pipeline.run(&item(&path), DegradationMode::Full).await.unwrap();
        assert!(result.semantic.is_none());
        assert!(!result.chunks.is_empty());

        match failures.try_recv() {
            Some(Event::SemanticAnalysisFailed { error, .. }) => {
                assert!(error.contains("rate limited"))
            }
            other => panic!("expected failure event, got {other:?}"),
        }
        let state = pipeline.registry.get(&result.path).unwrap().unwrap();
        assert_eq!(state.semantic_retry_count, 1);
        assert!(state.semantic_error.is_some());
    }

    #[tokio::test]
    async fn missing_file_aborts_with_file_unavailable() {
        let pipeline = pipeline_with(None, None);
        let missing = WorkItem::new("/nope/missing.txt", 0, 0, WorkKind::New);
        let err = pipeline.run(&missing, DegradationMode::Full).await.unwrap_err();
        assert!(matches!(err, Error::FileUnavailable(_)));
    }

    #[tokio::test]
    async fn content_change_resets_stale_analysis_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "version one").unwrap();

        let pipeline = pipeline_with(Some(Arc::new(MockSemanticProvider::fixed("s"))), None);
        pipeline.run(&item(&path), DegradationMode::Full).await.unwrap();

        let before = pipeline.registry.get(&path.to_string_lossy()).unwrap().unwrap();
        assert!(before.semantic_analyzed_at.is_some());

        // Rewrite content, then fail the semantic stage on the second run:
        // old success timestamps must not survive the content change.
        std::fs::write(&path, "version two").unwrap();
        let pipeline2 = Pipeline {
            semantic: Some(Arc::new(MockSemanticProvider::failing("down"))),
            ..pipeline
        };
        pipeline2.run(&item(&path), DegradationMode::Full).await.unwrap();

        let after = pipeline2.registry.get(&path.to_string_lossy()).unwrap().unwrap();
        assert!(after.semantic_analyzed_at.is_none());
        assert_eq!(after.semantic_retry_count, 1);
    }

    // Capability sanity for the mock: build_input sees the mock's caps.
    #[tokio::test]
    async fn semantic_only_image_without_content_capability_fails_soft() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cat.png");
        std::fs::write(&path, b"\x89PNG\r\n\x1a\nrest").unwrap();

        struct NoImages;
        #[async_trait::async_trait]
        impl SemanticProvider for NoImages {
            async fn analyze(&self, _input: SemanticInput) -> crate::error::Result<SemanticResult> {
                Ok(SemanticResult::default())
            }
            fn available(&self) -> bool {
                true
            }
            fn capabilities(&self) -> ProviderCapabilities {
                ProviderCapabilities { supports_images: false, ..Default::default() }
            }
            fn model_name(&self) -> &str {
                "no-images"
            }
        }

        let pipeline = pipeline_with(Some(Arc::new(NoImages)), None);
        pipeline
            .registry
            .remember_path(
                &dir.path().to_string_lossy(),
                &crate::types::PathConfig { use_vision: true },
            )
            .unwrap();

        let result = pipeline.run(&item(&path), DegradationMode::Full).await.unwrap();
        assert_eq!(result.ingest_mode, IngestMode::SemanticOnly);
        assert!(result.semantic.is_none());
        assert!(result.chunks.is_empty());
    }
}
