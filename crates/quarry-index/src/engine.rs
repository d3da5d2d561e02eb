//! Top-level facade tying change detection, indexing, retrieval, and the
//! derived symbol index together for one project root.

use std::path::PathBuf;
use std::sync::Arc;

use quarry_store::{EmbeddingProvider, HybridStore, SearchFilter};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::Config;
use crate::error::Result;
use crate::indexer::{IndexReport, Indexer};
use crate::manifest::Manifest;
use crate::pending::PendingLog;
use crate::query::{QueryEngine, RankedResult};
use crate::symbols::SymbolIndex;

/// Point-in-time view of the index.
#[derive(Debug, Clone, Default)]
pub struct Status {
    pub file_count: usize,
    pub chunk_count: usize,
    pub last_updated: i64,
    pub pending_files: usize,
    pub store_healthy: bool,
    pub embedding_degraded: bool,
}

pub struct Engine<P> {
    root: PathBuf,
    store: Arc<dyn HybridStore>,
    indexer: Indexer<P>,
    query: QueryEngine<P>,
    pending: Arc<PendingLog>,
    // Also serializes indexing runs: one run owns the manifest end to end.
    manifest: Mutex<Option<Manifest>>,
    symbols: RwLock<SymbolIndex>,
}

impl<P: EmbeddingProvider + 'static> Engine<P> {
    #[must_use]
    pub fn new(root: PathBuf, config: Config, store: Arc<dyn HybridStore>, provider: P) -> Self {
        let config = Arc::new(config);
        let provider = Arc::new(provider);
        let pending_path = if config.project.pending_path.is_absolute() {
            config.project.pending_path.clone()
        } else {
            root.join(&config.project.pending_path)
        };
        let pending = Arc::new(PendingLog::new(pending_path));

        let indexer = Indexer::new(
            Arc::clone(&store),
            Arc::clone(&provider),
            Arc::clone(&pending),
            Arc::clone(&config),
        );
        let query = QueryEngine::new(Arc::clone(&store), provider, config);
        let manifest = Manifest::load(&indexer.manifest_path(&root));

        Self {
            root,
            store,
            indexer,
            query,
            pending,
            manifest: Mutex::new(manifest),
            symbols: RwLock::new(SymbolIndex::default()),
        }
    }

    /// Reindex the tree, or just the given relative paths.
    ///
    /// # Errors
    ///
    /// Propagates fatal indexing errors; per-file failures land in the
    /// report instead.
    pub async fn reindex(&self, scope: Option<Vec<String>>) -> Result<IndexReport> {
        self.reindex_with_cancel(scope, &CancellationToken::new())
            .await
    }

    /// Reindex with an externally controlled cancellation token. A
    /// cancelled run commits the files that already finished.
    ///
    /// # Errors
    ///
    /// Same contract as [`Engine::reindex`].
    pub async fn reindex_with_cancel(
        &self,
        scope: Option<Vec<String>>,
        cancel: &CancellationToken,
    ) -> Result<IndexReport> {
        let mut guard = self.manifest.lock().await;
        let (manifest, report) = self
            .indexer
            .run(&self.root, guard.take(), scope.as_deref(), cancel)
            .await?;
        *guard = Some(manifest);
        drop(guard);

        self.rebuild_symbols().await;
        Ok(report)
    }

    /// Hybrid search over the indexed chunks.
    ///
    /// # Errors
    ///
    /// Fails only when both retrieval signals are unusable.
    pub async fn search(
        &self,
        text: &str,
        k: usize,
        filter: Option<SearchFilter>,
    ) -> Result<Vec<RankedResult>> {
        self.query.search(text, k, filter).await
    }

    /// Chunk ids defining `symbol`.
    pub async fn symbol_definitions(&self, symbol: &str) -> Vec<String> {
        self.symbols
            .read()
            .await
            .chunks_for(symbol)
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Chunk ids referencing `symbol`.
    pub async fn symbol_references(&self, symbol: &str) -> Vec<String> {
        self.symbols
            .read()
            .await
            .references_to(symbol)
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub async fn status(&self) -> Status {
        let (file_count, chunk_count, last_updated) = {
            let guard = self.manifest.lock().await;
            guard.as_ref().map_or((0, 0, 0), |m| {
                (m.stats.file_count, m.stats.chunk_count, m.updated_at)
            })
        };
        Status {
            file_count,
            chunk_count,
            last_updated,
            pending_files: self.pending.len(),
            store_healthy: self.store.healthy().await,
            embedding_degraded: self.query.is_degraded(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    async fn rebuild_symbols(&self) {
        match self.store.scroll_chunks().await {
            Ok(chunks) => {
                let index = SymbolIndex::build(chunks.iter());
                *self.symbols.write().await = index;
            }
            Err(e) => warn!(error = %e, "symbol index rebuild failed, keeping stale index"),
        }
    }
}
