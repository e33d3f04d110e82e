//! TOML configuration.
//!
//! Every section has defaults, so an empty file (or no file at all, see
//! [`Config::minimal`]) yields a working setup that reads papers from
//! `./papers` and persists the index under `./storage`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Highest accepted `top_k`.
pub const MAX_TOP_K: usize = 10;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_persist_dir")]
    pub persist_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            persist_dir: default_persist_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./papers")
}
fn default_persist_dir() -> PathBuf {
    PathBuf::from("./storage")
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoaderConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    ["pdf", "md", "txt", "docx"]
        .iter()
        .map(|ext| format!("**/*.{}", ext))
        .collect()
}
fn default_max_file_bytes() -> u64 {
    50 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
        }
    }
}

fn default_max_tokens() -> usize {
    256
}
fn default_overlap() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_streaming")]
    pub streaming: bool,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            base_url: None,
            models: default_models(),
            default_model: default_model(),
            temperature: default_temperature(),
            top_k: default_top_k(),
            streaming: default_streaming(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_models() -> Vec<String> {
    vec![
        "gpt-3.5-turbo".to_string(),
        "gpt-4".to_string(),
        "gpt-4-turbo-preview".to_string(),
    ]
}
fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_top_k() -> usize {
    3
}
fn default_streaming() -> bool {
    true
}
fn default_llm_timeout_secs() -> u64 {
    120
}

impl Config {
    /// Built-in defaults, used when no config file is present.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Same defaults, but reading from and persisting to the given directories.
    pub fn with_paths(data_dir: impl Into<PathBuf>, persist_dir: impl Into<PathBuf>) -> Self {
        let mut cfg = Self::minimal();
        cfg.paths.data_dir = data_dir.into();
        cfg.paths.persist_dir = persist_dir.into();
        cfg
    }
}

/// Read and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Load `path` if it exists, otherwise fall back to [`Config::minimal`].
pub fn load_or_minimal(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::minimal())
    }
}

pub fn validate(config: &Config) -> Result<()> {
    // The snapshot is swapped in via sibling directories named after it.
    if config.paths.persist_dir.file_name().is_none() {
        bail!(
            "paths.persist_dir '{}' must name a directory (not '.', '..' or a root); \
             use e.g. \"./storage\"",
            config.paths.persist_dir.display()
        );
    }

    // Validate chunking
    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        bail!("chunking.overlap_tokens must be smaller than chunking.max_tokens");
    }

    // Validate embedding
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.model.trim().is_empty() {
        bail!("embedding.model must not be empty");
    }
    match config.embedding.provider.as_str() {
        "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be openai or ollama.",
            other
        ),
    }

    // Validate llm
    match config.llm.provider.as_str() {
        "openai" | "ollama" => {}
        other => bail!("Unknown llm provider: '{}'. Must be openai or ollama.", other),
    }
    if config.llm.models.is_empty() {
        bail!("llm.models must list at least one model");
    }
    if !config.llm.models.contains(&config.llm.default_model) {
        bail!(
            "llm.default_model '{}' is not listed in llm.models",
            config.llm.default_model
        );
    }
    if !(0.0..=1.0).contains(&config.llm.temperature) {
        bail!("llm.temperature must be in [0.0, 1.0]");
    }
    if !(1..=MAX_TOP_K).contains(&config.llm.top_k) {
        bail!("llm.top_k must be in [1, {}]", MAX_TOP_K);
    }

    Ok(())
}
