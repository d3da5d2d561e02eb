//! Indexing orchestrator: diff → chunk → embed → store → commit.
//!
//! Files are processed by a bounded worker pool; manifest updates happen
//! only in the collector loop, so a file either lands fully (chunks in the
//! store, record in the manifest) or not at all. Failed files go to the
//! pending log and keep their previous manifest record, which makes the
//! next diff pick them up again.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use quarry_store::{EmbeddingProvider, HybridStore, IndexedEntry, SparseVector};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chunker::{self, ChunkerConfig};
use crate::config::Config;
use crate::context::contextualize_for_embedding;
use crate::error::{IndexError, Result};
use crate::languages::detect_language;
use crate::manifest::{FileRecord, Manifest};
use crate::merkle::{self, TreeDiff, TreeSnapshot};
use crate::pending::PendingLog;

/// Summary of an indexing run.
#[derive(Debug, Default)]
pub struct IndexReport {
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub files_removed: usize,
    pub chunks_created: usize,
    pub chunks_removed: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
    pub cancelled: bool,
}

struct FileSuccess {
    chunk_ids: Vec<String>,
    language: String,
    chunks_removed: usize,
    warning: Option<String>,
}

struct FileOutcome {
    path: String,
    result: Result<FileSuccess>,
}

/// Drives incremental indexing for one project root.
pub struct Indexer<P> {
    store: Arc<dyn HybridStore>,
    provider: Arc<P>,
    pending: Arc<PendingLog>,
    config: Arc<Config>,
}

impl<P: EmbeddingProvider + 'static> Indexer<P> {
    #[must_use]
    pub fn new(
        store: Arc<dyn HybridStore>,
        provider: Arc<P>,
        pending: Arc<PendingLog>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            provider,
            pending,
            config,
        }
    }

    /// Run one indexing pass over `root`.
    ///
    /// `scope` restricts processing to the given relative paths (and
    /// anything under them); `None` means the whole tree. The returned
    /// manifest has already been persisted.
    ///
    /// # Errors
    ///
    /// Fatal errors only: embedding probe failure, dimension mismatch
    /// with the existing index, store setup failure, or a manifest that
    /// cannot be saved. Per-file failures are reported, queued for retry,
    /// and do not abort the run.
    pub async fn run(
        &self,
        root: &Path,
        manifest: Option<Manifest>,
        scope: Option<&[String]>,
        cancel: &CancellationToken,
    ) -> Result<(Manifest, IndexReport)> {
        let start = std::time::Instant::now();
        let mut report = IndexReport::default();

        let dim = self.probe_dimension().await?;
        if let Some(m) = &manifest {
            m.check_dimension(dim)?;
        }
        self.store
            .ensure_ready(u64::try_from(dim).unwrap_or(u64::MAX))
            .await?;

        let snapshot = merkle::snapshot(
            root,
            &self.config.indexer.include,
            &self.config.indexer.exclude,
        )?;
        for w in &snapshot.warnings {
            warn!("{w}");
        }
        report.files_scanned = snapshot.files.len();

        let mut diff = merkle::diff(&snapshot, manifest.as_ref());
        if let Some(scope) = scope {
            restrict(&mut diff, scope);
        }
        let mut manifest = manifest.unwrap_or_default();
        self.replay_pending(&snapshot, &manifest, &mut diff);

        let mut to_index: Vec<String> = diff.added;
        to_index.extend(diff.changed);
        to_index.sort_unstable();
        to_index.dedup();

        info!(
            to_index = to_index.len(),
            to_remove = diff.removed.len(),
            scanned = report.files_scanned,
            "indexing pass"
        );

        for path in &diff.removed {
            match self.store.delete_by_file(path).await {
                Ok(n) => {
                    report.chunks_removed += n;
                    report.files_removed += 1;
                    manifest.files.remove(path);
                }
                Err(e) => {
                    report.errors.push(format!("{path}: {e}"));
                    self.pending.append(path, &format!("delete failed: {e}"))?;
                }
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.config.indexer.max_workers.max(1)));
        let mut tasks: JoinSet<FileOutcome> = JoinSet::new();

        for path in to_index {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let semaphore = Arc::clone(&semaphore);
            let store = Arc::clone(&self.store);
            let provider = Arc::clone(&self.provider);
            let config = Arc::clone(&self.config);
            let abs = root.join(&path);
            tasks.spawn(async move {
                // Semaphore is never closed while tasks run.
                let Ok(_permit) = semaphore.acquire().await else {
                    return FileOutcome {
                        path,
                        result: Err(IndexError::Cancelled),
                    };
                };
                let result = index_file(&store, provider.as_ref(), &config, &abs, &path).await;
                FileOutcome { path, result }
            });
        }

        // Single collector: the only place the manifest is mutated.
        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(o) => o,
                Err(e) => {
                    report.errors.push(format!("worker panicked: {e}"));
                    continue;
                }
            };
            match outcome.result {
                Ok(success) => {
                    if let Some(w) = success.warning {
                        warn!("{w}");
                    }
                    report.files_indexed += 1;
                    report.chunks_created += success.chunk_ids.len();
                    report.chunks_removed += success.chunks_removed;
                    if let Some(meta) = snapshot.files.get(&outcome.path) {
                        manifest.files.insert(
                            outcome.path.clone(),
                            FileRecord {
                                path: outcome.path.clone(),
                                content_hash: meta.content_hash.clone(),
                                mtime: meta.mtime,
                                chunk_ids: success.chunk_ids,
                            },
                        );
                    }
                    debug!(file = %outcome.path, lang = %success.language, "indexed");
                }
                Err(e) => {
                    report.errors.push(format!("{}: {e}", outcome.path));
                    self.pending.append(&outcome.path, &e.to_string())?;
                }
            }
        }

        manifest.recompute_dirs();
        let languages: BTreeSet<String> = manifest
            .files
            .keys()
            .filter_map(|p| detect_language(Path::new(p)))
            .map(|l| l.id().to_string())
            .collect();
        manifest.recompute_stats(languages, Some(dim));
        manifest.touch();
        manifest.save(&self.manifest_path(root))?;

        report.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        info!(
            indexed = report.files_indexed,
            chunks = report.chunks_created,
            removed = report.files_removed,
            errors = report.errors.len(),
            duration_ms = report.duration_ms,
            "indexing finished"
        );
        Ok((manifest, report))
    }

    /// Resolve the manifest path relative to the project root.
    #[must_use]
    pub fn manifest_path(&self, root: &Path) -> PathBuf {
        if self.config.project.manifest_path.is_absolute() {
            self.config.project.manifest_path.clone()
        } else {
            root.join(&self.config.project.manifest_path)
        }
    }

    async fn probe_dimension(&self) -> Result<usize> {
        let timeout = Duration::from_millis(self.config.embedding.timeout_ms);
        let probe = tokio::time::timeout(timeout, self.provider.embed("dimension probe"))
            .await
            .map_err(|_| {
                IndexError::Embedding(quarry_store::EmbedError::Timeout(
                    self.config.embedding.timeout_ms,
                ))
            })??;
        Ok(probe.len())
    }

    /// Fold previously failed files back into the diff.
    fn replay_pending(&self, snapshot: &TreeSnapshot, manifest: &Manifest, diff: &mut TreeDiff) {
        let drained = match self.pending.drain() {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "pending log unreadable, skipping replay");
                return;
            }
        };
        for path in drained {
            if snapshot.files.contains_key(&path) {
                if !diff.added.contains(&path) && !diff.changed.contains(&path) {
                    diff.changed.push(path);
                }
            } else if manifest.files.contains_key(&path) && !diff.removed.contains(&path) {
                diff.removed.push(path);
            }
        }
    }
}

/// Index one file end to end: read, chunk, embed, replace in the store.
///
/// The store swap runs only after every chunk embedded cleanly, so a
/// mid-file embedding failure leaves the old chunks in place.
async fn index_file<P: EmbeddingProvider>(
    store: &Arc<dyn HybridStore>,
    provider: &P,
    config: &Config,
    abs: &Path,
    rel: &str,
) -> Result<FileSuccess> {
    let source = tokio::fs::read_to_string(abs).await?;
    let lang = detect_language(abs).ok_or(IndexError::UnsupportedLanguage)?;

    let chunker_config = ChunkerConfig {
        min_tokens: config.chunker.min_tokens,
        max_tokens: config.chunker.max_tokens,
    };
    let (chunks, warning) = chunker::extract_or_raw(&source, rel, lang, &chunker_config);

    let timeout = Duration::from_millis(config.embedding.timeout_ms);
    let mut entries = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let text = contextualize_for_embedding(&chunk);
        let dense = tokio::time::timeout(timeout, provider.embed(&text))
            .await
            .map_err(|_| {
                IndexError::Embedding(quarry_store::EmbedError::Timeout(
                    config.embedding.timeout_ms,
                ))
            })??;
        let sparse = SparseVector::encode(&text);
        entries.push(IndexedEntry {
            chunk,
            dense,
            sparse,
            project: config.project.name.clone(),
        });
    }

    let chunk_ids = entries.iter().map(|e| e.chunk.id.clone()).collect();
    let chunks_removed = store.replace_file(rel, entries).await?;

    Ok(FileSuccess {
        chunk_ids,
        language: lang.id().to_string(),
        chunks_removed,
        warning,
    })
}

/// Keep only diff entries at or under one of the scope paths.
fn restrict(diff: &mut TreeDiff, scope: &[String]) {
    let in_scope = |path: &String| {
        scope
            .iter()
            .any(|s| path == s || path.starts_with(&format!("{s}/")))
    };
    diff.added.retain(in_scope);
    diff.changed.retain(in_scope);
    diff.removed.retain(in_scope);
}
