//! Daemon configuration: `mnemo.toml` overlaid by CLI flags.

use crate::queue::QueueConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Roots to remember, walk, and watch.
    pub roots: Vec<PathBuf>,
    /// SQLite database path (registry + durable persistence queue).
    pub db_path: PathBuf,
    pub workers: usize,
    pub queue_capacity: usize,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub max_chunk_size: usize,
    /// Route images through the semantic provider.
    pub use_vision: bool,
    /// Seconds granted to workers when shutting down.
    pub stop_deadline_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            db_path: PathBuf::from("mnemo.db"),
            workers: 4,
            queue_capacity: 1000,
            max_retries: 3,
            backoff_base_ms: 1000,
            max_chunk_size: 4096,
            use_vision: false,
            stop_deadline_secs: 10,
        }
    }
}

impl DaemonConfig {
    /// Load from a TOML file; a missing file means defaults, a malformed
    /// file is reported and replaced with defaults.
    pub fn load(path: &Path) -> Self {
        let Ok(raw) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match toml::from_str(&raw) {
            Ok(config) => config,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "malformed config, using defaults");
                Self::default()
            }
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            capacity: self.queue_capacity,
            workers: self.workers,
            max_retries: self.max_retries,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = DaemonConfig::load(Path::new("/no/such/mnemo.toml"));
        assert_eq!(config.workers, 4);
        assert_eq!(config.queue_capacity, 1000);
    }

    #[test]
    fn toml_overrides_selected_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mnemo.toml");
        std::fs::write(&path, "workers = 8\nuse_vision = true\n").unwrap();

        let config = DaemonConfig::load(&path);
        assert_eq!(config.workers, 8);
        assert!(config.use_vision);
        // Unset fields keep their defaults.
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn malformed_toml_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mnemo.toml");
        std::fs::write(&path, "workers = [not toml").unwrap();
        let config = DaemonConfig::load(&path);
        assert_eq!(config.workers, 4);
    }
}
