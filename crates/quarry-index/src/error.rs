//! Error types for the indexing engine.

use quarry_store::{EmbedError, StoreError};

/// Errors that can occur during indexing and retrieval.
///
/// Per-file failures (`Io`, `Parse`) never abort a pass; they are collected
/// as warnings and the file is skipped or falls back to a raw chunk.
/// Manifest and dimension errors are fatal to the pass.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// IO error reading source files or writing the manifest.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Tree-sitter parsing error; callers fall back to a raw chunk.
    #[error("parse failed: {0}")]
    Parse(String),

    /// Unsupported or unrecognized language.
    #[error("unsupported language")]
    UnsupportedLanguage,

    /// Embedding boundary failure; the affected file's upsert is skipped
    /// atomically and queued for retry.
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbedError),

    /// Store boundary failure; the affected batch is queued for retry.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Embedding dimension differs from the one recorded in the manifest.
    #[error("embedding dimension mismatch: manifest has {expected}, provider returned {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File watcher error.
    #[error("watcher error: {0}")]
    Watcher(#[from] notify::Error),

    /// The indexing pass was cancelled before completion.
    #[error("indexing cancelled")]
    Cancelled,
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
