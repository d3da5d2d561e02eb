//! In-memory hybrid store: the reference implementation used by tests and
//! single-process deployments.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

use crate::error::StoreError;
use crate::record::{ChunkRecord, IndexedEntry, ScoredEntry, SearchFilter};
use crate::sparse::SparseVector;
use crate::store::HybridStore;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Chunk-id keyed map behind a single `RwLock`; upserts and deletes hold the
/// write lock for their whole call, so readers never observe a file's chunk
/// set half-replaced.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, IndexedEntry>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn rank<F>(&self, filter: Option<&SearchFilter>, limit: usize, score: F) -> Vec<ScoredEntry>
    where
        F: Fn(&IndexedEntry) -> f32,
    {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut hits: Vec<ScoredEntry> = entries
            .values()
            .filter(|e| filter.is_none_or(|f| f.matches(&e.chunk, &e.project)))
            .map(|e| ScoredEntry {
                score: score(e),
                chunk: e.chunk.clone(),
            })
            .filter(|h| h.score > 0.0)
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        hits.truncate(limit);
        hits
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

impl HybridStore for MemoryStore {
    fn ensure_ready(&self, _vector_size: u64) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async { Ok(()) })
    }

    fn upsert(&self, entries: Vec<IndexedEntry>) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let mut map = self
                .entries
                .write()
                .map_err(|e| StoreError::Upsert(e.to_string()))?;
            for entry in entries {
                map.insert(entry.chunk.id.clone(), entry);
            }
            Ok(())
        })
    }

    fn replace_file(
        &self,
        path: &str,
        entries: Vec<IndexedEntry>,
    ) -> BoxFuture<'_, Result<usize, StoreError>> {
        let path = path.to_owned();
        Box::pin(async move {
            // Old set out, new set in, under one write lock: readers never
            // see the file absent mid-swap.
            let mut map = self
                .entries
                .write()
                .map_err(|e| StoreError::Upsert(e.to_string()))?;
            let before = map.len();
            map.retain(|_, e| e.chunk.file != path);
            let removed = before - map.len();
            for entry in entries {
                map.insert(entry.chunk.id.clone(), entry);
            }
            Ok(removed)
        })
    }

    fn delete_by_file(&self, path: &str) -> BoxFuture<'_, Result<usize, StoreError>> {
        let path = path.to_owned();
        Box::pin(async move {
            let mut map = self
                .entries
                .write()
                .map_err(|e| StoreError::Delete(e.to_string()))?;
            let before = map.len();
            map.retain(|_, e| e.chunk.file != path);
            Ok(before - map.len())
        })
    }

    fn query_dense(
        &self,
        vector: Vec<f32>,
        filter: Option<SearchFilter>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<ScoredEntry>, StoreError>> {
        Box::pin(async move {
            Ok(self.rank(filter.as_ref(), limit, |e| {
                cosine_similarity(&e.dense, &vector)
            }))
        })
    }

    fn query_sparse(
        &self,
        sparse: SparseVector,
        filter: Option<SearchFilter>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<ScoredEntry>, StoreError>> {
        Box::pin(async move { Ok(self.rank(filter.as_ref(), limit, |e| e.sparse.dot(&sparse))) })
    }

    fn indexed_files(&self) -> BoxFuture<'_, Result<Vec<String>, StoreError>> {
        Box::pin(async {
            let map = self
                .entries
                .read()
                .map_err(|e| StoreError::Search(e.to_string()))?;
            let mut files: Vec<String> = map.values().map(|e| e.chunk.file.clone()).collect();
            files.sort_unstable();
            files.dedup();
            Ok(files)
        })
    }

    fn scroll_chunks(&self) -> BoxFuture<'_, Result<Vec<ChunkRecord>, StoreError>> {
        Box::pin(async {
            let map = self
                .entries
                .read()
                .map_err(|e| StoreError::Search(e.to_string()))?;
            let mut chunks: Vec<ChunkRecord> = map.values().map(|e| e.chunk.clone()).collect();
            chunks.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(chunks)
        })
    }

    fn chunk_count(&self) -> BoxFuture<'_, Result<usize, StoreError>> {
        Box::pin(async {
            let map = self
                .entries
                .read()
                .map_err(|e| StoreError::Search(e.to_string()))?;
            Ok(map.len())
        })
    }

    fn healthy(&self) -> BoxFuture<'_, bool> {
        Box::pin(async { true })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ChunkKind;

    fn entry(id: &str, file: &str, content: &str, dense: Vec<f32>) -> IndexedEntry {
        IndexedEntry {
            chunk: ChunkRecord {
                id: id.into(),
                file: file.into(),
                language: "rust".into(),
                kind: ChunkKind::Function,
                name: id.into(),
                signature: None,
                start_line: 1,
                end_line: 5,
                start_byte: 0,
                end_byte: content.len(),
                content: content.into(),
                dependencies: std::collections::BTreeSet::new(),
                docstring: None,
                parent: None,
                part: None,
            },
            sparse: SparseVector::encode(content),
            dense,
            project: "test".into(),
        }
    }

    #[tokio::test]
    async fn upsert_overwrites_by_id() {
        let store = MemoryStore::new();
        store
            .upsert(vec![entry("c1", "a.rs", "fn one() {}", vec![1.0, 0.0])])
            .await
            .unwrap();
        store
            .upsert(vec![entry("c1", "a.rs", "fn one_v2() {}", vec![0.0, 1.0])])
            .await
            .unwrap();
        assert_eq!(store.chunk_count().await.unwrap(), 1);

        let chunks = store.scroll_chunks().await.unwrap();
        assert!(chunks[0].content.contains("one_v2"));
    }

    #[tokio::test]
    async fn replace_file_swaps_chunk_set() {
        let store = MemoryStore::new();
        store
            .upsert(vec![
                entry("old1", "a.rs", "fn one() {}", vec![1.0, 0.0]),
                entry("old2", "a.rs", "fn two() {}", vec![1.0, 0.0]),
                entry("keep", "b.rs", "fn three() {}", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let removed = store
            .replace_file("a.rs", vec![entry("new1", "a.rs", "fn merged() {}", vec![0.0, 1.0])])
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let chunks = store.scroll_chunks().await.unwrap();
        let a_ids: Vec<&str> = chunks
            .iter()
            .filter(|c| c.file == "a.rs")
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(a_ids, vec!["new1"]);
        assert_eq!(store.chunk_count().await.unwrap(), 2);

        // Replacing with an empty set is a plain delete.
        let removed = store.replace_file("a.rs", Vec::new()).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.indexed_files().await.unwrap(), vec!["b.rs"]);
    }

    #[tokio::test]
    async fn delete_by_file_counts() {
        let store = MemoryStore::new();
        store
            .upsert(vec![
                entry("c1", "a.rs", "fn one() {}", vec![1.0, 0.0]),
                entry("c2", "a.rs", "fn two() {}", vec![1.0, 0.0]),
                entry("c3", "b.rs", "fn three() {}", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        assert_eq!(store.delete_by_file("a.rs").await.unwrap(), 2);
        assert_eq!(store.chunk_count().await.unwrap(), 1);
        assert_eq!(store.delete_by_file("a.rs").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn dense_query_ranks_by_cosine() {
        let store = MemoryStore::new();
        store
            .upsert(vec![
                entry("near", "a.rs", "alpha", vec![1.0, 0.0]),
                entry("far", "b.rs", "beta", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let hits = store
            .query_dense(vec![0.9, 0.1], None, 10)
            .await
            .unwrap();
        assert_eq!(hits[0].chunk.id, "near");
        assert!(hits[0].score > hits.last().unwrap().score || hits.len() == 1);
    }

    #[tokio::test]
    async fn sparse_query_matches_identifiers() {
        let store = MemoryStore::new();
        store
            .upsert(vec![
                entry("hit", "a.rs", "fn validate_token() {}", vec![1.0]),
                entry("miss", "b.rs", "fn render_widget() {}", vec![1.0]),
            ])
            .await
            .unwrap();

        let hits = store
            .query_sparse(SparseVector::encode("validate token"), None, 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.id, "hit");
    }

    #[tokio::test]
    async fn filters_restrict_results() {
        let store = MemoryStore::new();
        let mut py = entry("py", "app.py", "def handle(): pass", vec![1.0]);
        py.chunk.language = "python".into();
        store
            .upsert(vec![entry("rs", "a.rs", "fn handle() {}", vec![1.0]), py])
            .await
            .unwrap();

        let filter = SearchFilter {
            language: Some("python".into()),
            ..SearchFilter::default()
        };
        let hits = store
            .query_dense(vec![1.0], Some(filter), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.id, "py");
    }

    #[tokio::test]
    async fn indexed_files_distinct_sorted() {
        let store = MemoryStore::new();
        store
            .upsert(vec![
                entry("c1", "b.rs", "x", vec![1.0]),
                entry("c2", "a.rs", "y", vec![1.0]),
                entry("c3", "a.rs", "z", vec![1.0]),
            ])
            .await
            .unwrap();
        assert_eq!(store.indexed_files().await.unwrap(), vec!["a.rs", "b.rs"]);
    }

    #[test]
    fn cosine_zero_for_mismatched_lengths() {
        assert!((cosine_similarity(&[1.0], &[1.0, 0.0]) - 0.0).abs() < f32::EPSILON);
    }

    #[test]
    fn cosine_unit_for_identical() {
        let v = [0.6, 0.8];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }
}
