//! Test harness for end-to-end analysis tests.
//!
//! Builds a full core (registry, durable queue, bus, memory graph, worker
//! pool) around a temp directory, with mock providers standing in for the
//! remote seams.

use mnemo_server::bus::EventBus;
use mnemo_server::chunker::{ChunkOptions, ChunkerRegistry};
use mnemo_server::db;
use mnemo_server::dpq::PersistenceQueue;
use mnemo_server::graph::MemoryGraph;
use mnemo_server::pipeline::Pipeline;
use mnemo_server::queue::{QueueConfig, WorkQueue};
use mnemo_server::registry::Registry;
use mnemo_server::testing::{MockEmbeddingsProvider, MockSemanticProvider};
use mnemo_server::types::{Event, Topic};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub struct TestHarness {
    pub registry: Registry,
    pub dpq: PersistenceQueue,
    pub bus: EventBus,
    pub graph: Arc<MemoryGraph>,
    pub queue: Arc<WorkQueue>,
    temp_dir: TempDir,
}

pub struct HarnessOptions {
    pub capacity: usize,
    pub workers: usize,
    pub semantic: Option<Arc<MockSemanticProvider>>,
    pub embeddings: Option<Arc<MockEmbeddingsProvider>>,
    pub graph_connected: bool,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            capacity: 100,
            workers: 2,
            semantic: Some(Arc::new(MockSemanticProvider::fixed("fixed summary"))),
            embeddings: Some(Arc::new(MockEmbeddingsProvider::fixed(vec![0.1, 0.2]))),
            graph_connected: true,
        }
    }
}

impl TestHarness {
    pub fn new(options: HarnessOptions) -> Self {
        let temp_dir = TempDir::new().expect("temp dir");
        let database = db::open_in_memory().expect("in-memory db");
        let registry = Registry::new(database.clone());
        let dpq = PersistenceQueue::new(database);
        let bus = EventBus::new();
        let graph = Arc::new(MemoryGraph::new(options.graph_connected));

        let pipeline = Pipeline {
            registry: registry.clone(),
            chunkers: ChunkerRegistry::standard(),
            semantic: options.semantic.map(|p| p as Arc<dyn mnemo_server::semantic::SemanticProvider>),
            embeddings: options
                .embeddings
                .map(|p| p as Arc<dyn mnemo_server::embed::EmbeddingsProvider>),
            tokenizer: Arc::new(mnemo_core::BytesEstimateTokenizer),
            bus: bus.clone(),
            chunk_options: ChunkOptions::default(),
            analysis_version: "e2e-test".into(),
        };

        let queue = Arc::new(WorkQueue::new(
            QueueConfig {
                capacity: options.capacity,
                workers: options.workers,
                max_retries: 3,
                backoff_base: Duration::from_millis(10),
            },
            pipeline,
            graph.clone(),
            dpq.clone(),
            bus.clone(),
        ));

        Self { registry, dpq, bus, graph, queue, temp_dir }
    }

    /// Write a file under the harness temp dir and return its path.
    pub fn write_file(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::write(&path, content).expect("write fixture");
        path
    }

    pub fn root(&self) -> &std::path::Path {
        self.temp_dir.path()
    }

    /// Subscribe before triggering work so no event is missed.
    pub fn subscribe(&self, topic: Topic) -> mnemo_server::bus::Subscription {
        self.bus.subscribe(topic)
    }
}

/// Await the next event on a subscription, failing the test after `secs`.
pub async fn next_event(sub: &mut mnemo_server::bus::Subscription, secs: u64) -> Event {
    tokio::time::timeout(Duration::from_secs(secs), sub.recv())
        .await
        .expect("timed out waiting for event")
        .expect("bus closed")
}
