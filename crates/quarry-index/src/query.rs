//! Hybrid query path: dense and sparse retrieval fused with reciprocal
//! rank fusion.
//!
//! The two signals run concurrently against the store. When the embedding
//! provider is down the engine degrades to sparse-only retrieval instead
//! of failing the query.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use quarry_store::{
    ChunkRecord, EmbeddingProvider, HybridStore, ScoredEntry, SearchFilter, SparseVector,
};
use tracing::warn;

use crate::config::Config;
use crate::error::Result;

/// One fused search result.
#[derive(Debug, Clone)]
pub struct RankedResult {
    pub chunk: ChunkRecord,
    pub fused_score: f64,
}

/// Executes hybrid searches against the store.
pub struct QueryEngine<P> {
    store: Arc<dyn HybridStore>,
    provider: Arc<P>,
    config: Arc<Config>,
    degraded: AtomicBool,
}

impl<P: EmbeddingProvider> QueryEngine<P> {
    #[must_use]
    pub fn new(store: Arc<dyn HybridStore>, provider: Arc<P>, config: Arc<Config>) -> Self {
        Self {
            store,
            provider,
            config,
            degraded: AtomicBool::new(false),
        }
    }

    /// Whether the last search ran without a dense signal.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Search for the top `k` chunks matching `text`.
    ///
    /// # Errors
    ///
    /// Returns an error only when both retrieval signals fail; a single
    /// failed or timed-out signal degrades to the other.
    pub async fn search(
        &self,
        text: &str,
        k: usize,
        filter: Option<SearchFilter>,
    ) -> Result<Vec<RankedResult>> {
        if k == 0 || text.trim().is_empty() {
            return Ok(Vec::new());
        }
        // Each signal over-fetches so fusion has candidates outside the
        // other signal's prefix.
        let fetch = k.saturating_mul(2);
        let store_timeout = Duration::from_millis(self.config.query.store_timeout_ms);

        let dense_query = self.embed_query(text).await;
        self.degraded
            .store(dense_query.is_none(), Ordering::Relaxed);

        let sparse_query = SparseVector::encode(text);

        let dense_fut = async {
            match &dense_query {
                Some(vector) => {
                    run_signal(
                        "dense",
                        store_timeout,
                        self.store
                            .query_dense(vector.clone(), filter.clone(), fetch),
                    )
                    .await
                }
                None => Vec::new(),
            }
        };
        let sparse_fut = async {
            if sparse_query.is_empty() {
                Vec::new()
            } else {
                run_signal(
                    "sparse",
                    store_timeout,
                    self.store
                        .query_sparse(sparse_query.clone(), filter.clone(), fetch),
                )
                .await
            }
        };
        let (dense, sparse) = tokio::join!(dense_fut, sparse_fut);

        Ok(rrf_fuse(
            &[dense, sparse],
            self.config.query.rrf_constant,
            k,
        ))
    }

    async fn embed_query(&self, text: &str) -> Option<Vec<f32>> {
        let timeout = Duration::from_millis(self.config.embedding.timeout_ms);
        match tokio::time::timeout(timeout, self.provider.embed(text)).await {
            Ok(Ok(vector)) => Some(vector),
            Ok(Err(e)) => {
                warn!(error = %e, "embedding unavailable, sparse-only search");
                None
            }
            Err(_) => {
                warn!("embedding timed out, sparse-only search");
                None
            }
        }
    }
}

async fn run_signal(
    name: &str,
    timeout: Duration,
    fut: impl Future<Output = std::result::Result<Vec<ScoredEntry>, quarry_store::StoreError>>,
) -> Vec<ScoredEntry> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(entries)) => entries,
        Ok(Err(e)) => {
            warn!(signal = name, error = %e, "retrieval signal failed");
            Vec::new()
        }
        Err(_) => {
            warn!(signal = name, "retrieval signal timed out");
            Vec::new()
        }
    }
}

/// Reciprocal rank fusion over independently ranked lists.
///
/// Each list contributes `1 / (c + rank)` per chunk with 1-based ranks;
/// chunks absent from a list contribute nothing for it. Equal fused
/// scores order by ascending chunk id so results are reproducible.
#[must_use]
pub fn rrf_fuse(lists: &[Vec<ScoredEntry>], c: f64, k: usize) -> Vec<RankedResult> {
    use std::collections::HashMap;

    let mut scores: HashMap<&str, f64> = HashMap::new();
    let mut chunks: HashMap<&str, &ChunkRecord> = HashMap::new();

    for list in lists {
        for (rank, entry) in list.iter().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let contribution = 1.0 / (c + (rank + 1) as f64);
            *scores.entry(entry.chunk.id.as_str()).or_insert(0.0) += contribution;
            chunks.entry(entry.chunk.id.as_str()).or_insert(&entry.chunk);
        }
    }

    let mut fused: Vec<(&str, f64)> = scores.into_iter().collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });
    fused.truncate(k);

    fused
        .into_iter()
        .map(|(id, fused_score)| RankedResult {
            chunk: chunks[id].clone(),
            fused_score,
        })
        .collect()
}
