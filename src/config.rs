//! TOML configuration.
//!
//! Only `[db].path` and `[corpus].root` are required; every other section
//! falls back to defaults. [`load_config`] parses and validates in one step so
//! an inconsistent configuration is rejected before any work starts.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Environment variable overriding `[corpus].root`.
pub const ENV_CORPUS_DIR: &str = "DOCQA_CORPUS_DIR";
/// Environment variable overriding `[db].path`.
pub const ENV_DB_PATH: &str = "DOCQA_DB_PATH";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl CorpusConfig {
    /// Corpus rooted at `root` with default filters.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.md".to_string(),
        "**/*.txt".to_string(),
        "**/*.pdf".to_string(),
        "**/*.docx".to_string(),
    ]
}
fn default_max_file_bytes() -> u64 {
    20 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
    #[serde(default)]
    pub boundary_window_chars: Option<usize>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: default_max_chunk_chars(),
            overlap_chars: default_overlap_chars(),
            boundary_window_chars: None,
        }
    }
}

fn default_max_chunk_chars() -> usize {
    800
}
fn default_overlap_chars() -> usize {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            api_key_env: default_api_key_env(),
            batch_size: default_batch_size(),
            retry_max_attempts: default_retry_max_attempts(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_retry_max_attempts() -> u32 {
    3
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: None,
            url: None,
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            retry_max_attempts: default_retry_max_attempts(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_generation_provider() -> String {
    "extractive".to_string()
}
fn default_temperature() -> f32 {
    0.5
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_generation_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: i64,
    #[serde(default = "default_similarity_floor")]
    pub similarity_floor: Option<f64>,
    #[serde(default = "default_context_char_budget")]
    pub context_char_budget: usize,
    #[serde(default)]
    pub allow_ungrounded: bool,
    #[serde(default)]
    pub prompt_template: Option<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            similarity_floor: default_similarity_floor(),
            context_char_budget: default_context_char_budget(),
            allow_ungrounded: false,
            prompt_template: None,
        }
    }
}

fn default_top_k() -> i64 {
    8
}
fn default_similarity_floor() -> Option<f64> {
    Some(0.2)
}
fn default_context_char_budget() -> usize {
    16_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

/// Read, parse, apply environment overrides and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::config(format!(
            "failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    let mut config = parse_config(&content)?;
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Parse TOML text without touching the environment or validating.
pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).map_err(|e| Error::config(format!("failed to parse config: {}", e)))
}

impl Config {
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var(ENV_CORPUS_DIR) {
            if !dir.is_empty() {
                self.corpus.root = PathBuf::from(dir);
            }
        }
        if let Ok(db) = std::env::var(ENV_DB_PATH) {
            if !db.is_empty() {
                self.db.path = PathBuf::from(db);
            }
        }
    }

    /// Check parameter ranges and cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        let c = &self.chunking;
        if c.max_chunk_chars == 0 {
            return Err(Error::config("chunking.max_chunk_chars must be > 0"));
        }
        if c.overlap_chars >= c.max_chunk_chars {
            return Err(Error::config(format!(
                "chunking.overlap_chars ({}) must be smaller than chunking.max_chunk_chars ({})",
                c.overlap_chars, c.max_chunk_chars
            )));
        }

        let e = &self.embedding;
        if e.batch_size == 0 {
            return Err(Error::config("embedding.batch_size must be > 0"));
        }
        if e.retry_max_attempts == 0 {
            return Err(Error::config("embedding.retry_max_attempts must be >= 1"));
        }
        match e.provider.as_str() {
            "hash" | "local" => {}
            "openai" | "ollama" => {
                if e.model.is_none() {
                    return Err(Error::config(format!(
                        "embedding.model must be specified when provider is '{}'",
                        e.provider
                    )));
                }
                if e.dims.is_none() || e.dims == Some(0) {
                    return Err(Error::config(format!(
                        "embedding.dims must be > 0 when provider is '{}'",
                        e.provider
                    )));
                }
            }
            other => {
                return Err(Error::config(format!(
                    "unknown embedding provider '{}': must be hash, openai, ollama or local",
                    other
                )))
            }
        }
        if e.dims == Some(0) {
            return Err(Error::config("embedding.dims must be > 0"));
        }

        let g = &self.generation;
        if g.retry_max_attempts == 0 {
            return Err(Error::config("generation.retry_max_attempts must be >= 1"));
        }
        match g.provider.as_str() {
            "extractive" => {}
            "openai" | "ollama" => {
                if g.model.is_none() {
                    return Err(Error::config(format!(
                        "generation.model must be specified when provider is '{}'",
                        g.provider
                    )));
                }
            }
            other => {
                return Err(Error::config(format!(
                    "unknown generation provider '{}': must be extractive, openai or ollama",
                    other
                )))
            }
        }

        let r = &self.retrieval;
        if r.top_k < 1 {
            return Err(Error::config("retrieval.top_k must be >= 1"));
        }
        if r.context_char_budget == 0 {
            return Err(Error::config("retrieval.context_char_budget must be > 0"));
        }
        if let Some(floor) = r.similarity_floor {
            if !(-1.0..=1.0).contains(&floor) {
                return Err(Error::config("retrieval.similarity_floor must be in [-1.0, 1.0]"));
            }
        }

        if self.ingest.concurrency == 0 {
            return Err(Error::config("ingest.concurrency must be >= 1"));
        }

        Ok(())
    }
}
