//! Error types for the store boundary.

/// Errors from hybrid store backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backend unreachable or refusing connections.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Collection setup or inspection failed.
    #[error("collection error: {0}")]
    Collection(String),

    /// Upsert failed; no partial batch was persisted.
    #[error("upsert error: {0}")]
    Upsert(String),

    /// Delete failed.
    #[error("delete error: {0}")]
    Delete(String),

    /// Search failed.
    #[error("search error: {0}")]
    Search(String),

    /// Payload encoding/decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Errors from the embedding provider boundary.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// Provider unreachable; callers degrade to sparse-only retrieval.
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),

    /// Provider call exceeded the caller-supplied timeout.
    #[error("embedding call timed out after {0}ms")]
    Timeout(u64),

    /// Returned vector dimension does not match the negotiated one.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },
}
