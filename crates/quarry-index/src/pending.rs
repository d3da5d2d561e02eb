//! Durable retry log for files that failed mid-pipeline.
//!
//! Embedding or store failures must not silently drop a file from the
//! index, so the path is appended to a JSON-lines log and replayed at the
//! start of the next indexing run.

use std::collections::BTreeSet;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingWrite {
    pub path: String,
    pub reason: String,
    pub queued_at: i64,
}

/// Append-only log of files awaiting retry.
#[derive(Debug)]
pub struct PendingLog {
    path: PathBuf,
}

impl PendingLog {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Record a failed file. One JSON object per line; duplicates are
    /// collapsed on drain.
    ///
    /// # Errors
    ///
    /// Propagates filesystem failures; at that point there is nowhere
    /// left to record the file, so the caller escalates.
    pub fn append(&self, path: &str, reason: &str) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let entry = PendingWrite {
            path: path.to_string(),
            reason: reason.to_string(),
            queued_at: now(),
        };
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        file.write_all(&line)?;
        file.sync_all()?;
        Ok(())
    }

    /// Take every queued path and truncate the log. Unparsable lines are
    /// logged and skipped rather than wedging the whole queue.
    ///
    /// # Errors
    ///
    /// Propagates filesystem failures other than the log not existing.
    pub fn drain(&self) -> Result<Vec<String>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut paths = BTreeSet::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<PendingWrite>(line) {
                Ok(entry) => {
                    paths.insert(entry.path);
                }
                Err(e) => warn!(error = %e, "skipping malformed pending entry"),
            }
        }
        std::fs::remove_file(&self.path)?;
        Ok(paths.into_iter().collect())
    }

    /// Number of distinct paths currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        let Ok(content) = std::fs::read_to_string(&self.path) else {
            return 0;
        };
        content
            .lines()
            .filter_map(|l| serde_json::from_str::<PendingWrite>(l).ok())
            .map(|e| e.path)
            .collect::<BTreeSet<_>>()
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}
