//! Filesystem watcher feeding debounced change batches to the engine.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify_debouncer_mini::{DebouncedEventKind, new_debouncer};
use quarry_store::EmbeddingProvider;
use tokio::sync::mpsc;
use tracing::warn;

use crate::engine::Engine;
use crate::error::Result;
use crate::languages::is_indexable;
use crate::merkle::rel_path;

const DEBOUNCE: Duration = Duration::from_secs(1);

pub struct IndexWatcher {
    _handle: tokio::task::JoinHandle<()>,
}

impl IndexWatcher {
    /// Watch the engine's root and trigger a scoped reindex for each
    /// debounced batch of changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the filesystem watcher cannot be initialized.
    pub fn start<P: EmbeddingProvider + 'static>(engine: Arc<Engine<P>>) -> Result<Self> {
        let (notify_tx, mut notify_rx) = mpsc::channel::<Vec<PathBuf>>(64);

        let mut debouncer = new_debouncer(
            DEBOUNCE,
            move |events: std::result::Result<
                Vec<notify_debouncer_mini::DebouncedEvent>,
                notify::Error,
            >| {
                let events = match events {
                    Ok(events) => events,
                    Err(e) => {
                        warn!("index watcher error: {e}");
                        return;
                    }
                };

                // One batch per debounce window keeps a burst of saves to
                // a single indexing pass.
                let paths: BTreeSet<PathBuf> = events
                    .into_iter()
                    .filter(|e| e.kind == DebouncedEventKind::Any && is_indexable(&e.path))
                    .map(|e| e.path)
                    .collect();

                if !paths.is_empty() {
                    let _ = notify_tx.blocking_send(paths.into_iter().collect());
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(engine.root(), notify::RecursiveMode::Recursive)?;

        let handle = tokio::spawn(async move {
            let _debouncer = debouncer;
            while let Some(paths) = notify_rx.recv().await {
                let scope: Vec<String> = paths
                    .iter()
                    .map(|p| rel_path(engine.root(), p))
                    .collect();
                if let Err(e) = engine.reindex(Some(scope)).await {
                    warn!("watcher reindex failed: {e}");
                }
            }
        });

        Ok(Self { _handle: handle })
    }
}
