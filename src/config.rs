use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default embedding dimension (all-MiniLM class models).
pub const DEFAULT_DIMENSIONS: usize = 384;
/// Default chunk window size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
/// Default overlap between consecutive chunks.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db: DbConfig::default(),
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("goldie").join("index.db")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Backend name; only `"ollama"` is built in.
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Vector dimension; 0 means "derive from the model name".
    #[serde(default)]
    pub dimensions: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            base_url: default_base_url(),
            model: default_model(),
            dimensions: 0,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_backend() -> String {
    "ollama".to_string()
}
fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

impl EmbeddingConfig {
    /// Resolve the effective dimension, falling back to the model's known
    /// size when the config leaves it at 0.
    pub fn resolved_dimensions(&self) -> usize {
        if self.dimensions > 0 {
            return self.dimensions;
        }
        match self.model.as_str() {
            "nomic-embed-text" => 768,
            "mxbai-embed-large" => 1024,
            "all-minilm" => DEFAULT_DIMENSIONS,
            _ => DEFAULT_DIMENSIONS,
        }
    }
}

impl Config {
    /// Apply environment overrides (`GOLDIE_DB_PATH`).
    pub fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("GOLDIE_DB_PATH") {
            if !path.is_empty() {
                self.db.path = PathBuf::from(path);
            }
        }
    }
}

/// Load and validate a configuration file, or fall back to defaults when
/// no path is given.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p)
                .with_context(|| format!("Failed to read config file: {}", p.display()))?;
            toml::from_str(&content).with_context(|| "Failed to parse config file")?
        }
        None => Config::default(),
    };

    config.apply_env();

    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be smaller than chunk_size");
    }

    match config.embedding.backend.as_str() {
        "ollama" => {}
        other => anyhow::bail!("Unknown embedding backend: '{}'. Must be ollama.", other),
    }

    if config.embedding.resolved_dimensions() == 0 {
        anyhow::bail!("embedding.dimensions must be > 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = load_config(None).unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.embedding.backend, "ollama");
        assert_eq!(config.embedding.resolved_dimensions(), 768);
    }

    #[test]
    fn overlap_must_stay_below_chunk_size() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("goldie.toml");
        std::fs::write(
            &path,
            "[chunking]\nchunk_size = 100\nchunk_overlap = 100\n",
        )
        .unwrap();
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("goldie.toml");
        std::fs::write(&path, "[embedding]\nbackend = \"onnx\"\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn dimension_fallback_by_model() {
        let mut emb = EmbeddingConfig::default();
        assert_eq!(emb.resolved_dimensions(), 768);
        emb.model = "all-minilm".to_string();
        assert_eq!(emb.resolved_dimensions(), 384);
        emb.dimensions = 512;
        assert_eq!(emb.resolved_dimensions(), 512);
    }
}
