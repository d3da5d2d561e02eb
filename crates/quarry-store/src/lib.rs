//! Persistence boundary for Quarry: chunk records, sparse keyword encoding,
//! the embedding-provider trait, and hybrid (dense + sparse) store backends.
//!
//! The engine crate writes [`IndexedEntry`] batches through the
//! [`HybridStore`] trait and reads back ranked candidates per signal. Two
//! backends ship here: an in-memory reference store used by tests and small
//! deployments, and a Qdrant-backed store for real collections.

pub mod embedding;
pub mod error;
pub mod memory;
pub mod qdrant;
pub mod record;
pub mod sparse;
pub mod store;

pub use embedding::EmbeddingProvider;
#[cfg(feature = "mock")]
pub use embedding::HashEmbedding;
pub use error::{EmbedError, StoreError};
pub use memory::MemoryStore;
pub use qdrant::QdrantStore;
pub use record::{ChunkKind, ChunkRecord, IndexedEntry, ScoredEntry, SearchFilter};
pub use sparse::SparseVector;
pub use store::HybridStore;
