//! Chunk records and search filters shared by the engine and the backends.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::sparse::SparseVector;

/// Syntactic category of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Function,
    Method,
    Class,
    /// File-level residue: imports, constants, top-level statements.
    Module,
    /// Sibling batch that did not map to a single named entity.
    Block,
    /// Whole-file fallback emitted when parsing fails.
    Raw,
}

impl ChunkKind {
    /// Identifier used in store payloads and filters.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::Module => "module",
            Self::Block => "block",
            Self::Raw => "raw",
        }
    }

    /// Inverse of [`ChunkKind::id`], used when decoding store payloads.
    #[must_use]
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "function" => Some(Self::Function),
            "method" => Some(Self::Method),
            "class" => Some(Self::Class),
            "module" => Some(Self::Module),
            "block" => Some(Self::Block),
            "raw" => Some(Self::Raw),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// One extracted chunk: the atomic retrievable unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Stable id derived from file path, start line, and name.
    pub id: String,
    /// File path relative to the indexed root, `/`-separated.
    pub file: String,
    /// Language id, e.g. `rust`.
    pub language: String,
    pub kind: ChunkKind,
    /// Entity name, or a fallback label for unnamed chunks.
    pub name: String,
    /// Declaration line up to the body, when one exists.
    pub signature: Option<String>,
    pub start_line: usize,
    pub end_line: usize,
    pub start_byte: usize,
    pub end_byte: usize,
    pub content: String,
    /// Referenced symbol and module names found inside the chunk.
    pub dependencies: BTreeSet<String>,
    pub docstring: Option<String>,
    /// Name of the enclosing chunk, if any.
    pub parent: Option<String>,
    /// Sub-index when an oversized entity was split into sequential parts.
    pub part: Option<u32>,
}

/// A chunk plus the vectors and denormalized fields the store persists.
#[derive(Debug, Clone)]
pub struct IndexedEntry {
    pub chunk: ChunkRecord,
    pub dense: Vec<f32>,
    pub sparse: SparseVector,
    pub project: String,
}

/// One candidate from a single retrieval signal.
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub chunk: ChunkRecord,
    pub score: f32,
}

/// Metadata filter applied to both retrieval signals.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub language: Option<String>,
    pub kind: Option<ChunkKind>,
    pub project: Option<String>,
    /// Glob matched against the chunk's file path.
    pub file_glob: Option<String>,
}

impl SearchFilter {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.language.is_none()
            && self.kind.is_none()
            && self.project.is_none()
            && self.file_glob.is_none()
    }

    /// Client-side filter evaluation; backends with native filtering only
    /// use this for the glob part.
    #[must_use]
    pub fn matches(&self, chunk: &ChunkRecord, project: &str) -> bool {
        if let Some(lang) = &self.language
            && chunk.language != *lang
        {
            return false;
        }
        if let Some(kind) = self.kind
            && chunk.kind != kind
        {
            return false;
        }
        if let Some(p) = &self.project
            && project != p
        {
            return false;
        }
        if let Some(pattern) = &self.file_glob {
            match glob::Pattern::new(pattern) {
                Ok(pat) => {
                    if !pat.matches(&chunk.file) {
                        return false;
                    }
                }
                Err(e) => {
                    tracing::warn!(pattern, "invalid file glob in filter: {e}");
                    return false;
                }
            }
        }
        true
    }
}
