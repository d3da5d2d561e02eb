use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{IndexError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub project: ProjectConfig,
    pub store: StoreConfig,
    pub embedding: EmbeddingConfig,
    pub indexer: IndexerConfig,
    pub chunker: ChunkerSettings,
    pub query: QueryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub name: String,
    pub manifest_path: PathBuf,
    pub pending_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub url: String,
    pub collection: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub max_workers: usize,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChunkerSettings {
    pub min_tokens: usize,
    pub max_tokens: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub rrf_constant: f64,
    pub store_timeout_ms: u64,
}

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str::<Self>(&content)
                .map_err(|e| IndexError::Parse(format!("config: {e}")))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("QUARRY_PROJECT") {
            self.project.name = v;
        }
        if let Ok(v) = std::env::var("QUARRY_STORE_URL") {
            self.store.url = v;
        }
        if let Ok(v) = std::env::var("QUARRY_STORE_COLLECTION") {
            self.store.collection = v;
        }
        if let Ok(v) = std::env::var("QUARRY_EMBEDDING_TIMEOUT_MS")
            && let Ok(ms) = v.parse()
        {
            self.embedding.timeout_ms = ms;
        }
        if let Ok(v) = std::env::var("QUARRY_MAX_WORKERS")
            && let Ok(n) = v.parse()
        {
            self.indexer.max_workers = n;
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project: ProjectConfig::default(),
            store: StoreConfig::default(),
            embedding: EmbeddingConfig::default(),
            indexer: IndexerConfig::default(),
            chunker: ChunkerSettings::default(),
            query: QueryConfig::default(),
        }
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: "default".into(),
            manifest_path: PathBuf::from(".quarry/manifest.json"),
            pending_path: PathBuf::from(".quarry/pending.jsonl"),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6334".into(),
            collection: "quarry".into(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { timeout_ms: 10_000 }
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

impl Default for ChunkerSettings {
    fn default() -> Self {
        Self {
            min_tokens: 32,
            max_tokens: 2000,
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            rrf_constant: 60.0,
            store_timeout_ms: 5_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_when_file_missing() {
        let config = Config::default();
        assert_eq!(config.project.name, "default");
        assert_eq!(config.store.url, "http://localhost:6334");
        assert_eq!(config.store.collection, "quarry");
        assert_eq!(config.chunker.min_tokens, 32);
        assert_eq!(config.chunker.max_tokens, 2000);
        assert!((config.query.rrf_constant - 60.0).abs() < f64::EPSILON);
        assert_eq!(config.indexer.max_workers, 8);
    }

    #[test]
    fn parse_valid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quarry.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(
            f,
            r#"
[project]
name = "myproj"

[store]
url = "http://qdrant:6334"
collection = "code"

[chunker]
min_tokens = 16
max_tokens = 1024

[indexer]
max_workers = 4
exclude = ["target/**"]
"#
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.project.name, "myproj");
        assert_eq!(config.store.url, "http://qdrant:6334");
        assert_eq!(config.store.collection, "code");
        assert_eq!(config.chunker.min_tokens, 16);
        assert_eq!(config.chunker.max_tokens, 1024);
        assert_eq!(config.indexer.max_workers, 4);
        assert_eq!(config.indexer.exclude, vec!["target/**"]);
        // Sections absent from the file keep their defaults.
        assert_eq!(config.embedding.timeout_ms, 10_000);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.project.name, "default");
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[project\nname = ").unwrap();
        assert!(Config::load(&path).is_err());
    }
}
