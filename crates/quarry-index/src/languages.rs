//! Language detection and tree-sitter grammar registry.

use std::path::Path;

use quarry_store::ChunkKind;
use serde::{Deserialize, Serialize};

/// Supported language with its tree-sitter grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Go,
}

impl Lang {
    /// Identifier used in store payloads, filters, and the manifest.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Go => "go",
        }
    }

    /// Get the tree-sitter grammar. Returns `None` if the
    /// corresponding feature is not enabled.
    #[must_use]
    pub fn grammar(self) -> Option<tree_sitter::Language> {
        match self {
            #[cfg(feature = "lang-rust")]
            Self::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            #[cfg(feature = "lang-python")]
            Self::Python => Some(tree_sitter_python::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            #[cfg(feature = "lang-go")]
            Self::Go => Some(tree_sitter_go::LANGUAGE.into()),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// AST node kinds that become chunk boundaries.
    #[must_use]
    pub fn chunk_node_kinds(self) -> &'static [&'static str] {
        match self {
            Self::Rust => &[
                "function_item",
                "struct_item",
                "enum_item",
                "trait_item",
                "impl_item",
                "mod_item",
                "macro_definition",
            ],
            Self::Python => &[
                "function_definition",
                "class_definition",
                "decorated_definition",
            ],
            Self::JavaScript | Self::TypeScript => &[
                "function_declaration",
                "class_declaration",
                "method_definition",
                "interface_declaration",
            ],
            Self::Go => &[
                "function_declaration",
                "method_declaration",
                "type_declaration",
            ],
        }
    }

    /// Node kinds that act as containers whose chunkable children become
    /// chunks of their own, carrying the container as `parent`.
    #[must_use]
    pub fn container_node_kinds(self) -> &'static [&'static str] {
        match self {
            Self::Rust => &["impl_item", "trait_item", "mod_item"],
            Self::Python => &["class_definition"],
            Self::JavaScript | Self::TypeScript => &["class_declaration"],
            Self::Go => &[],
        }
    }

    /// Node kinds carrying import/use targets.
    #[must_use]
    pub fn import_node_kinds(self) -> &'static [&'static str] {
        match self {
            Self::Rust => &["use_declaration"],
            Self::Python => &["import_statement", "import_from_statement"],
            Self::JavaScript | Self::TypeScript => &["import_statement"],
            Self::Go => &["import_declaration"],
        }
    }

    /// Node kinds that name a referenced type or symbol inside a chunk.
    #[must_use]
    pub fn reference_node_kinds(self) -> &'static [&'static str] {
        match self {
            Self::Rust => &["type_identifier", "scoped_identifier"],
            Self::Python => &["identifier", "attribute"],
            Self::JavaScript | Self::TypeScript => &["identifier", "type_identifier"],
            Self::Go => &["type_identifier", "qualified_type"],
        }
    }

    /// Chunk kind for a chunkable node kind of this language.
    #[must_use]
    pub fn chunk_kind(self, node_kind: &str, has_parent: bool) -> ChunkKind {
        match node_kind {
            "function_item" | "function_definition" | "function_declaration"
            | "decorated_definition" => {
                if has_parent {
                    ChunkKind::Method
                } else {
                    ChunkKind::Function
                }
            }
            "method_definition" | "method_declaration" => ChunkKind::Method,
            "struct_item" | "enum_item" | "trait_item" | "impl_item" | "class_definition"
            | "class_declaration" | "interface_declaration" | "type_declaration" => {
                ChunkKind::Class
            }
            "mod_item" => ChunkKind::Module,
            _ => ChunkKind::Block,
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Detect language from file extension.
#[must_use]
pub fn detect_language(path: &Path) -> Option<Lang> {
    let ext = path.extension()?.to_str()?;
    match ext {
        "rs" => Some(Lang::Rust),
        "py" | "pyi" => Some(Lang::Python),
        "js" | "jsx" | "mjs" | "cjs" => Some(Lang::JavaScript),
        "ts" | "tsx" | "mts" | "cts" => Some(Lang::TypeScript),
        "go" => Some(Lang::Go),
        _ => None,
    }
}

/// Check if a file should be indexed (has a supported language with grammar).
#[must_use]
pub fn is_indexable(path: &Path) -> bool {
    detect_language(path).and_then(Lang::grammar).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_language_rs() {
        assert_eq!(detect_language(Path::new("src/main.rs")), Some(Lang::Rust));
    }

    #[test]
    fn detect_language_variants() {
        for (ext, lang) in [
            ("py", Lang::Python),
            ("jsx", Lang::JavaScript),
            ("tsx", Lang::TypeScript),
            ("go", Lang::Go),
        ] {
            let path = format!("file.{ext}");
            assert_eq!(detect_language(Path::new(&path)), Some(lang), ".{ext}");
        }
    }

    #[test]
    fn detect_language_unknown_ext_returns_none() {
        assert_eq!(detect_language(Path::new("file.xyz")), None);
        assert_eq!(detect_language(Path::new("file")), None);
        assert_eq!(detect_language(Path::new("image.png")), None);
    }

    #[test]
    fn chunk_node_kinds_rust() {
        let kinds = Lang::Rust.chunk_node_kinds();
        assert!(kinds.contains(&"function_item"));
        assert!(kinds.contains(&"impl_item"));
    }

    #[test]
    fn chunk_kind_mapping() {
        assert_eq!(
            Lang::Rust.chunk_kind("function_item", false),
            ChunkKind::Function
        );
        assert_eq!(
            Lang::Rust.chunk_kind("function_item", true),
            ChunkKind::Method
        );
        assert_eq!(Lang::Python.chunk_kind("class_definition", false), ChunkKind::Class);
        assert_eq!(Lang::Rust.chunk_kind("mod_item", false), ChunkKind::Module);
    }

    #[test]
    fn grammar_available_for_enabled_features() {
        #[cfg(feature = "lang-rust")]
        assert!(Lang::Rust.grammar().is_some());
        #[cfg(feature = "lang-python")]
        assert!(Lang::Python.grammar().is_some());
        #[cfg(feature = "lang-js")]
        {
            assert!(Lang::JavaScript.grammar().is_some());
            assert!(Lang::TypeScript.grammar().is_some());
        }
        #[cfg(feature = "lang-go")]
        assert!(Lang::Go.grammar().is_some());
    }

    #[test]
    fn is_indexable_by_extension() {
        #[cfg(feature = "lang-rust")]
        assert!(is_indexable(Path::new("src/main.rs")));
        assert!(!is_indexable(Path::new("README.md")));
    }

    #[test]
    fn lang_id_roundtrip() {
        for lang in [
            Lang::Rust,
            Lang::Python,
            Lang::JavaScript,
            Lang::TypeScript,
            Lang::Go,
        ] {
            assert!(!lang.id().is_empty());
            assert_eq!(lang.to_string(), lang.id());
        }
    }
}
