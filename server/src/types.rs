//! Server-side types: bus events, degradation modes, and per-path
//! configuration resolved through the registry.

use mnemo_core::AnalysisType;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Current wall-clock time as unix nanoseconds. Timestamps are i64 nanos
/// end to end (registry rows, metadata hashes, analysis results).
pub fn now_nanos() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Degradation
// ---------------------------------------------------------------------------

/// Queue-load-derived policy that selectively disables pipeline stages.
/// Ordering is severity: `Full < NoEmbed < Metadata`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationMode {
    Full,
    NoEmbed,
    Metadata,
}

impl DegradationMode {
    /// Recomputed on every stats read from occupancy `c = pending/capacity`.
    pub fn from_occupancy(occupancy: f64) -> Self {
        if occupancy >= 0.95 {
            DegradationMode::Metadata
        } else if occupancy >= 0.80 {
            DegradationMode::NoEmbed
        } else {
            DegradationMode::Full
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DegradationMode::Full => "full",
            DegradationMode::NoEmbed => "no_embed",
            DegradationMode::Metadata => "metadata",
        }
    }
}

// ---------------------------------------------------------------------------
// Per-path configuration
// ---------------------------------------------------------------------------

/// Effective configuration attached to a remembered ancestor path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathConfig {
    /// Route images through the semantic provider instead of metadata-only.
    #[serde(default)]
    pub use_vision: bool,
}

// ---------------------------------------------------------------------------
// Bus events
// ---------------------------------------------------------------------------

/// Topics the in-process bus routes on. Every `Event` maps to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    FileDiscovered,
    FileChanged,
    GraphConnected,
    AnalysisComplete,
    AnalysisFailed,
    GraphPersistenceFailed,
    SemanticAnalysisFailed,
    EmbeddingsGenerationFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    FileDiscovered {
        path: String,
        size: u64,
        mod_time: i64,
    },
    FileChanged {
        path: String,
        size: u64,
        mod_time: i64,
    },
    GraphConnected {
        endpoint: String,
    },
    AnalysisComplete {
        path: String,
        content_hash: String,
        analysis_type: AnalysisType,
        #[serde(with = "duration_millis")]
        duration: Duration,
    },
    AnalysisFailed {
        path: String,
        error: String,
        retries: u32,
    },
    GraphPersistenceFailed {
        path: String,
        error: String,
    },
    SemanticAnalysisFailed {
        path: String,
        error: String,
    },
    EmbeddingsGenerationFailed {
        path: String,
        error: String,
    },
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Event::FileDiscovered { .. } => Topic::FileDiscovered,
            Event::FileChanged { .. } => Topic::FileChanged,
            Event::GraphConnected { .. } => Topic::GraphConnected,
            Event::AnalysisComplete { .. } => Topic::AnalysisComplete,
            Event::AnalysisFailed { .. } => Topic::AnalysisFailed,
            Event::GraphPersistenceFailed { .. } => Topic::GraphPersistenceFailed,
            Event::SemanticAnalysisFailed { .. } => Topic::SemanticAnalysisFailed,
            Event::EmbeddingsGenerationFailed { .. } => Topic::EmbeddingsGenerationFailed,
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
