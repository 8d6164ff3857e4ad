//! Graph store interface and the in-process memory implementation.
//!
//! The daemon talks to the graph through this trait only; the memory graph
//! backs local runs without a remote endpoint and doubles as the test
//! double, including a connect/disconnect switch for outage scenarios.

use crate::error::{Error, Result};
use async_trait::async_trait;
use mnemo_core::{AnalyzedChunk, Entity, Reference};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// Node payloads
// ---------------------------------------------------------------------------

/// File-level node metadata written on every upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileNode {
    pub path: String,
    pub size: u64,
    pub mod_time: i64,
    pub content_hash: String,
    pub metadata_hash: String,
    pub mime: String,
    pub language: Option<String>,
    pub kind: String,
    pub ingest_mode: String,
    pub ingest_reason: String,
    pub summary: Option<String>,
    pub complexity: Option<u32>,
    pub keywords: Vec<String>,
    pub file_embedding: Option<Vec<f32>>,
    pub analysis_version: String,
    pub analyzed_at: i64,
}

// ---------------------------------------------------------------------------
// Store interface
// ---------------------------------------------------------------------------

#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn upsert_file(&self, file: &FileNode) -> Result<()>;
    async fn delete_file(&self, path: &str) -> Result<()>;
    /// Remove every chunk attached to a path (clean-slate rewrite).
    async fn delete_chunks(&self, path: &str) -> Result<()>;
    /// Chunk node identity is the chunk's content hash.
    async fn upsert_chunk(&self, path: &str, chunk: &AnalyzedChunk) -> Result<()>;
    async fn upsert_chunk_embedding(
        &self,
        chunk_hash: &str,
        provider: &str,
        model: &str,
        vector: &[f32],
    ) -> Result<()>;
    async fn set_file_tags(&self, path: &str, tags: &[String]) -> Result<()>;
    async fn set_file_topics(&self, path: &str, topics: &[String]) -> Result<()>;
    async fn set_file_entities(&self, path: &str, entities: &[Entity]) -> Result<()>;
    async fn set_file_references(&self, path: &str, references: &[Reference]) -> Result<()>;
    fn is_connected(&self) -> bool;
    fn endpoint(&self) -> String;
}

// ---------------------------------------------------------------------------
// Memory graph
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryGraphState {
    files: HashMap<String, FileNode>,
    /// path -> chunk content hashes, in persistence order.
    chunks: HashMap<String, Vec<AnalyzedChunk>>,
    /// (chunk_hash, provider, model) -> vector.
    embeddings: HashMap<(String, String, String), Vec<f32>>,
    tags: HashMap<String, Vec<String>>,
    topics: HashMap<String, Vec<String>>,
    entities: HashMap<String, Vec<Entity>>,
    references: HashMap<String, Vec<Reference>>,
}

/// HashMap-backed graph used for local daemon runs and tests.
pub struct MemoryGraph {
    state: Mutex<MemoryGraphState>,
    connected: AtomicBool,
    /// When set, every write fails even while "connected" (test hook for
    /// partial-failure paths).
    fail_writes: AtomicBool,
    /// Endpoint string announced on connect and in logs.
    endpoint: String,
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new(true)
    }
}

impl MemoryGraph {
    pub fn new(connected: bool) -> Self {
        Self::with_endpoint(connected, "memory://local")
    }

    pub fn with_endpoint(connected: bool, endpoint: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(MemoryGraphState::default()),
            connected: AtomicBool::new(connected),
            fail_writes: AtomicBool::new(false),
            endpoint: endpoint.into(),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Graph("graph disconnected".into()));
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Graph("write rejected".into()));
        }
        Ok(())
    }

    // Inspection helpers for tests and the status surface.

    pub fn file(&self, path: &str) -> Option<FileNode> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    pub fn chunk_count(&self, path: &str) -> usize {
        self.state.lock().unwrap().chunks.get(path).map(|c| c.len()).unwrap_or(0)
    }

    pub fn embedding(&self, chunk_hash: &str, provider: &str, model: &str) -> Option<Vec<f32>> {
        self.state
            .lock()
            .unwrap()
            .embeddings
            .get(&(chunk_hash.to_string(), provider.to_string(), model.to_string()))
            .cloned()
    }

    pub fn tags(&self, path: &str) -> Vec<String> {
        self.state.lock().unwrap().tags.get(path).cloned().unwrap_or_default()
    }

    pub fn file_count(&self) -> usize {
        self.state.lock().unwrap().files.len()
    }
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn upsert_file(&self, file: &FileNode) -> Result<()> {
        self.check()?;
        self.state.lock().unwrap().files.insert(file.path.clone(), file.clone());
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        state.files.remove(path);
        state.chunks.remove(path);
        state.tags.remove(path);
        state.topics.remove(path);
        state.entities.remove(path);
        state.references.remove(path);
        Ok(())
    }

    async fn delete_chunks(&self, path: &str) -> Result<()> {
        self.check()?;
        self.state.lock().unwrap().chunks.remove(path);
        Ok(())
    }

    async fn upsert_chunk(&self, path: &str, chunk: &AnalyzedChunk) -> Result<()> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        let chunks = state.chunks.entry(path.to_string()).or_default();
        match chunks.iter_mut().find(|c| c.content_hash == chunk.content_hash) {
            Some(existing) => *existing = chunk.clone(),
            None => chunks.push(chunk.clone()),
        }
        Ok(())
    }

    async fn upsert_chunk_embedding(
        &self,
        chunk_hash: &str,
        provider: &str,
        model: &str,
        vector: &[f32],
    ) -> Result<()> {
        self.check()?;
        self.state.lock().unwrap().embeddings.insert(
            (chunk_hash.to_string(), provider.to_string(), model.to_string()),
            vector.to_vec(),
        );
        Ok(())
    }

    async fn set_file_tags(&self, path: &str, tags: &[String]) -> Result<()> {
        self.check()?;
        self.state.lock().unwrap().tags.insert(path.to_string(), tags.to_vec());
        Ok(())
    }

    async fn set_file_topics(&self, path: &str, topics: &[String]) -> Result<()> {
        self.check()?;
        self.state.lock().unwrap().topics.insert(path.to_string(), topics.to_vec());
        Ok(())
    }

    async fn set_file_entities(&self, path: &str, entities: &[Entity]) -> Result<()> {
        self.check()?;
        self.state.lock().unwrap().entities.insert(path.to_string(), entities.to_vec());
        Ok(())
    }

    async fn set_file_references(&self, path: &str, references: &[Reference]) -> Result<()> {
        self.check()?;
        self.state.lock().unwrap().references.insert(path.to_string(), references.to_vec());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}
