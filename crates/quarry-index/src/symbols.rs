//! Derived symbol index for exact-name lookups.
//!
//! Built from the chunk set rather than persisted separately, so it can
//! always be rebuilt by scrolling the store. Maps a symbol name to the
//! chunks that define it and the chunks that reference it.

use std::collections::{BTreeMap, BTreeSet};

use quarry_store::ChunkRecord;

#[derive(Debug, Default)]
pub struct SymbolIndex {
    definitions: BTreeMap<String, BTreeSet<String>>,
    references: BTreeMap<String, BTreeSet<String>>,
}

impl SymbolIndex {
    /// Build the index from an iterator of chunks.
    pub fn build<'a>(chunks: impl IntoIterator<Item = &'a ChunkRecord>) -> Self {
        let mut index = Self::default();
        for chunk in chunks {
            index.insert(chunk);
        }
        index
    }

    fn insert(&mut self, chunk: &ChunkRecord) {
        if !chunk.name.is_empty() {
            self.definitions
                .entry(chunk.name.clone())
                .or_default()
                .insert(chunk.id.clone());
        }
        for dep in &chunk.dependencies {
            self.references
                .entry(dep.clone())
                .or_default()
                .insert(chunk.id.clone());
        }
    }

    /// Chunk ids that define `symbol`.
    #[must_use]
    pub fn chunks_for(&self, symbol: &str) -> Vec<&str> {
        self.definitions
            .get(symbol)
            .map(|ids| ids.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Chunk ids that reference `symbol` without defining it there.
    #[must_use]
    pub fn references_to(&self, symbol: &str) -> Vec<&str> {
        self.references
            .get(symbol)
            .map(|ids| ids.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// All known symbol names, definitions first.
    #[must_use]
    pub fn symbols(&self) -> Vec<&str> {
        let mut names: BTreeSet<&str> = self.definitions.keys().map(String::as_str).collect();
        names.extend(self.references.keys().map(String::as_str));
        names.into_iter().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use quarry_store::ChunkKind;

    use super::*;

    fn chunk(id: &str, name: &str, deps: &[&str]) -> ChunkRecord {
        ChunkRecord {
            id: id.to_string(),
            file: "src/lib.rs".into(),
            language: "rust".into(),
            kind: ChunkKind::Function,
            name: name.to_string(),
            signature: None,
            start_line: 1,
            end_line: 2,
            start_byte: 0,
            end_byte: 10,
            content: "fn x() {}".into(),
            dependencies: deps.iter().map(|d| (*d).to_string()).collect(),
            docstring: None,
            parent: None,
            part: None,
        }
    }

    #[test]
    fn definitions_and_references_tracked_separately() {
        let chunks = [
            chunk("c1", "validate", &[]),
            chunk("c2", "handler", &["validate"]),
            chunk("c3", "other_handler", &["validate", "render"]),
        ];
        let index = SymbolIndex::build(&chunks);

        assert_eq!(index.chunks_for("validate"), vec!["c1"]);
        assert_eq!(index.references_to("validate"), vec!["c2", "c3"]);
        assert!(index.chunks_for("render").is_empty());
        assert_eq!(index.references_to("render"), vec!["c3"]);
    }

    #[test]
    fn multiple_definitions_of_one_name() {
        let chunks = [chunk("c1", "new", &[]), chunk("c2", "new", &[])];
        let index = SymbolIndex::build(&chunks);
        assert_eq!(index.chunks_for("new"), vec!["c1", "c2"]);
    }

    #[test]
    fn rebuild_is_deterministic() {
        let chunks = [
            chunk("c2", "beta", &["alpha"]),
            chunk("c1", "alpha", &[]),
        ];
        let a = SymbolIndex::build(&chunks);
        let b = SymbolIndex::build(chunks.iter().rev());
        assert_eq!(a.symbols(), b.symbols());
        assert_eq!(a.chunks_for("alpha"), b.chunks_for("alpha"));
    }

    #[test]
    fn empty_index() {
        let index = SymbolIndex::build(std::iter::empty::<&ChunkRecord>());
        assert!(index.is_empty());
        assert!(index.symbols().is_empty());
    }
}
