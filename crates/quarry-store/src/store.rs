//! The hybrid store trait: one logical collection supporting both dense
//! similarity and sparse keyword scoring with metadata filters.

use std::future::Future;
use std::pin::Pin;

use crate::error::StoreError;
use crate::record::{ChunkRecord, IndexedEntry, ScoredEntry, SearchFilter};
use crate::sparse::SparseVector;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Generic hybrid vector + keyword datastore.
///
/// Per-file writes go through `replace_file`: a concurrent reader may
/// observe the file's old chunk set or its new one, never a gap between
/// the two and never a partial batch.
pub trait HybridStore: Send + Sync {
    /// Idempotent collection setup for the negotiated vector size.
    fn ensure_ready(&self, vector_size: u64) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Insert or fully overwrite entries by chunk id. Atomic per call: on
    /// error nothing from the batch is persisted.
    fn upsert(&self, entries: Vec<IndexedEntry>) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Swap every chunk of `path` for `entries` in one step; returns how
    /// many chunks the file had before. Readers see the old set or the
    /// new set, never the file absent in between.
    fn replace_file(
        &self,
        path: &str,
        entries: Vec<IndexedEntry>,
    ) -> BoxFuture<'_, Result<usize, StoreError>>;

    /// Remove every chunk associated with a file path; returns the count.
    fn delete_by_file(&self, path: &str) -> BoxFuture<'_, Result<usize, StoreError>>;

    /// Top candidates by dense cosine similarity, best first.
    fn query_dense(
        &self,
        vector: Vec<f32>,
        filter: Option<SearchFilter>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<ScoredEntry>, StoreError>>;

    /// Top candidates by sparse keyword overlap, best first.
    fn query_sparse(
        &self,
        sparse: SparseVector,
        filter: Option<SearchFilter>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<ScoredEntry>, StoreError>>;

    /// Distinct file paths currently represented in the store.
    fn indexed_files(&self) -> BoxFuture<'_, Result<Vec<String>, StoreError>>;

    /// All chunk records, used to rebuild derived views.
    fn scroll_chunks(&self) -> BoxFuture<'_, Result<Vec<ChunkRecord>, StoreError>>;

    fn chunk_count(&self) -> BoxFuture<'_, Result<usize, StoreError>>;

    /// Cheap liveness check for `status()` reporting.
    fn healthy(&self) -> BoxFuture<'_, bool>;
}
