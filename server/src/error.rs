//! Error taxonomy for the analysis core.
//!
//! Variants are kinds, not layers: the worker decides retry/abandon from the
//! kind, and observability events are the only cross-component error channel.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Stat/read failures; retried at the worker layer.
    #[error("file unavailable: {0}")]
    FileUnavailable(String),

    /// Hard chunking failure; aborts the pipeline for this item.
    #[error("chunker failed: {0}")]
    Chunker(String),

    /// Semantic provider failure; soft at the pipeline level.
    #[error("semantic analysis failed: {0}")]
    Semantic(String),

    /// Embeddings provider failure; soft at the pipeline level.
    #[error("embeddings generation failed: {0}")]
    Embeddings(String),

    /// Graph store call failed while connected.
    #[error("graph persistence failed: {0}")]
    Graph(String),

    /// Both the graph write and the durable queue fallback failed.
    #[error("graph persistence failed ({graph}); durable queue also failed ({queue})")]
    PersistenceLost { graph: String, queue: String },

    /// Bounded work channel is full; the item is rejected fast.
    #[error("work queue full")]
    QueueFull,

    /// A provider declined work because it is unavailable or lacks a capability.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// Relational storage (registry, durable queue).
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Programming errors surfaced loudly (e.g. unknown durable-queue id).
    #[error("state error: {0}")]
    State(String),
}

impl Error {
    /// Transient errors are retried with backoff; the rest abandon the item.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::FileUnavailable(_)
                | Error::Semantic(_)
                | Error::Embeddings(_)
                | Error::Graph(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(Error::FileUnavailable("gone".into()).is_transient());
        assert!(Error::Graph("down".into()).is_transient());
        assert!(!Error::QueueFull.is_transient());
        assert!(!Error::State("bad id".into()).is_transient());
    }
}
