//! Incremental code indexing and hybrid retrieval.
//!
//! A content-addressed hash tree over the source tree detects changes,
//! tree-sitter splits changed files into definition-aligned chunks, and
//! each chunk lands in the store with a dense embedding and a sparse
//! keyword vector. Queries run both signals and fuse them with
//! reciprocal rank fusion.

pub mod chunker;
pub mod config;
pub(crate) mod context;
pub mod engine;
pub mod error;
pub mod indexer;
pub mod languages;
pub mod manifest;
pub mod merkle;
pub mod pending;
pub mod query;
pub mod symbols;
pub mod watcher;

pub use config::Config;
pub use engine::{Engine, Status};
pub use error::{IndexError, Result};
pub use indexer::{IndexReport, Indexer};
pub use query::{QueryEngine, RankedResult};
pub use watcher::IndexWatcher;
