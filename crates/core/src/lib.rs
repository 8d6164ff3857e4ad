//! mnemo-core — shared data model for the mnemod analysis daemon.
//!
//! Holds the pure pieces that both the server and any future frontends need:
//! the analysis result types, content/metadata hashing, and token estimation.
//! Nothing in this crate does I/O or holds state.

pub mod hash;
pub mod tokenizer;
pub mod types;

pub use hash::{content_hash, metadata_hash, ContentHasher};
pub use tokenizer::{create_tokenizer, BytesEstimateTokenizer, Tokenizer};
pub use types::*;
