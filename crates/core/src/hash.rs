//! Content and metadata hashing.
//!
//! `content_hash` is a pure function of exact bytes (SHA-256, lowercase hex)
//! and serves as the graph identity of files and chunks. `metadata_hash`
//! digests (path, size, mod_time_nanos) and detects touch-without-change.

use sha2::{Digest, Sha256};

/// SHA-256 of exact bytes, lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// SHA-256 over `path|size|mod_time_nanos`, lowercase hex.
pub fn metadata_hash(path: &str, size: u64, mod_time_nanos: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update(b"|");
    hasher.update(size.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(mod_time_nanos.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Incremental hasher for streaming large files without holding their bytes.
pub struct ContentHasher {
    inner: Sha256,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self { inner: Sha256::new() }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    pub fn finish(self) -> String {
        hex::encode(self.inner.finalize())
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}
