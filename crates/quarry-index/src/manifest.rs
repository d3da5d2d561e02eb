//! Persisted record of the last committed index state.
//!
//! The manifest is plain JSON next to the index and is the sole source of
//! truth for incremental diffing. Writes are atomic (temp file, fsync,
//! rename) so a crash mid-write leaves the previous manifest intact; a
//! missing or corrupt manifest simply forces a full reindex.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{IndexError, Result};
use crate::merkle::{self, FileMeta};

/// One indexed file and the chunks it produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileRecord {
    pub path: String,
    pub content_hash: String,
    pub mtime: i64,
    pub chunk_ids: Vec<String>,
}

/// Stored hash for one directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirRecord {
    pub path: String,
    pub dir_hash: String,
}

/// Aggregate counters kept alongside the tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stats {
    pub file_count: usize,
    pub chunk_count: usize,
    pub languages: BTreeSet<String>,
    /// Dimension of the dense vectors in the store; a mismatch with the
    /// active embedding provider is fatal at startup.
    pub embedding_dim: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    pub root_hash: String,
    pub updated_at: i64,
    pub stats: Stats,
    pub files: BTreeMap<String, FileRecord>,
    pub dirs: BTreeMap<String, DirRecord>,
}

impl Manifest {
    /// Load the manifest from disk. A missing file is a normal first run;
    /// an unreadable or unparsable one is logged and treated the same way.
    #[must_use]
    pub fn load(path: &Path) -> Option<Manifest> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "manifest unreadable, full reindex");
                return None;
            }
        };
        match serde_json::from_slice::<Manifest>(&bytes) {
            Ok(m) => Some(m),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "manifest corrupt, full reindex");
                None
            }
        }
    }

    /// Persist atomically: write a sibling temp file, fsync, then rename
    /// over the target.
    ///
    /// # Errors
    ///
    /// Propagates serialization and filesystem failures; the caller treats
    /// a failed save as fatal for the indexing run.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        {
            use std::io::Write as _;
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Recompute every directory hash and the root hash from the file
    /// records currently in the manifest.
    ///
    /// Derived from the manifest's own records rather than the live tree,
    /// so files whose indexing failed keep their old hash and show up as
    /// changed again on the next run.
    pub fn recompute_dirs(&mut self) {
        let files: BTreeMap<String, FileMeta> = self
            .files
            .values()
            .map(|r| {
                (
                    r.path.clone(),
                    FileMeta {
                        content_hash: r.content_hash.clone(),
                        mtime: r.mtime,
                    },
                )
            })
            .collect();
        self.dirs = merkle::derive_dir_hashes(&files)
            .into_iter()
            .map(|(path, dir_hash)| (path.clone(), DirRecord { path, dir_hash }))
            .collect();
        self.root_hash = self
            .dirs
            .get("")
            .map_or_else(|| merkle::EMPTY_DIR_HASH.to_string(), |d| d.dir_hash.clone());
    }

    /// Refresh aggregate counters from the file records.
    pub fn recompute_stats(&mut self, languages: BTreeSet<String>, embedding_dim: Option<usize>) {
        self.stats.file_count = self.files.len();
        self.stats.chunk_count = self.files.values().map(|f| f.chunk_ids.len()).sum();
        self.stats.languages = languages;
        self.stats.embedding_dim = embedding_dim;
    }

    /// Check the persisted vector dimension against the active provider.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::DimensionMismatch`] when the store was built
    /// with a different embedding dimension.
    pub fn check_dimension(&self, provider_dim: usize) -> Result<()> {
        match self.stats.embedding_dim {
            Some(stored) if stored != provider_dim => Err(IndexError::DimensionMismatch {
                expected: stored,
                actual: provider_dim,
            }),
            _ => Ok(()),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX));
    }
}
