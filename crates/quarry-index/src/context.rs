//! Contextualized embedding text generation.
//!
//! Embedding raw code alone gives poor retrieval quality. Prepending
//! file path, enclosing scope, language tag, and dependency names
//! noticeably improves results for conceptual queries like "where is
//! auth handled?"

use quarry_store::ChunkRecord;

/// Maximum number of dependency names included in the embedding text.
const MAX_DEPENDENCIES: usize = 8;

/// Generate text optimized for embedding (not for display).
#[must_use]
pub fn contextualize_for_embedding(chunk: &ChunkRecord) -> String {
    let mut text = String::with_capacity(chunk.content.len() + 256);

    text.push_str("# ");
    text.push_str(&chunk.file);
    text.push('\n');

    if let Some(parent) = &chunk.parent {
        text.push_str("# Scope: ");
        text.push_str(parent);
        text.push('\n');
    }

    text.push_str("# Language: ");
    text.push_str(&chunk.language);
    text.push('\n');

    if !chunk.dependencies.is_empty() {
        let deps: Vec<&str> = chunk
            .dependencies
            .iter()
            .take(MAX_DEPENDENCIES)
            .map(String::as_str)
            .collect();
        text.push_str("# Uses: ");
        text.push_str(&deps.join(", "));
        text.push('\n');
    }

    if let Some(doc) = &chunk.docstring {
        text.push_str(doc);
        text.push('\n');
    }

    text.push_str(&chunk.content);
    text
}

/// Short header for displaying a retrieved chunk.
#[must_use]
pub fn chunk_display_header(chunk: &ChunkRecord) -> String {
    format!(
        "{} :: {} (lines {}-{})",
        chunk.file, chunk.name, chunk.start_line, chunk.end_line
    )
}
