use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub profile: ProfileConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub journal: JournalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProfileConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    /// Serialised index size at which ingest spills entry chunks to the store.
    #[serde(default = "default_spill_threshold")]
    pub spill_threshold_bytes: usize,
    /// Refuse a single chunk write larger than this.
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: usize,
}

fn default_spill_threshold() -> usize {
    1024 * 1024
}
fn default_max_chunk_bytes() -> usize {
    8 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Number of concurrent embedding requests per ingest batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            base_url: None,
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_local")]
    pub provider: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            provider: default_local(),
            model: default_chat_model(),
            base_url: None,
            timeout_secs: default_timeout_secs(),
            temperature: 0.0,
            max_tokens: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct JournalConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_local() -> String {
    "local".to_string()
}
fn default_chat_model() -> String {
    "qwen2.5:3b".to_string()
}
fn default_batch_size() -> usize {
    5
}
fn default_timeout_secs() -> u64 {
    15
}
fn default_debounce_ms() -> u64 {
    2000
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl Config {
    /// Minimal configuration for tests and scaffolding.
    pub fn minimal() -> Self {
        Self {
            profile: ProfileConfig {
                path: PathBuf::from("./profile.yaml"),
            },
            store: StoreConfig {
                path: PathBuf::from("./data/formfill.sqlite"),
                spill_threshold_bytes: default_spill_threshold(),
                max_chunk_bytes: default_max_chunk_bytes(),
            },
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            chat: ChatConfig::default(),
            journal: JournalConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate retrieval
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    // Validate journal
    if config.journal.debounce_ms == 0 {
        anyhow::bail!("journal.debounce_ms must be > 0");
    }

    // Validate store
    if config.store.spill_threshold_bytes == 0 {
        anyhow::bail!("store.spill_threshold_bytes must be > 0");
    }

    // Validate embedding
    if config.embedding.is_enabled() && config.embedding.model.is_none() {
        anyhow::bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }

    match config.embedding.provider.as_str() {
        "disabled" | "local" | "external" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, local, or external.",
            other
        ),
    }

    match config.chat.provider.as_str() {
        "local" | "external" => {}
        other => anyhow::bail!(
            "Unknown chat provider: '{}'. Must be local or external.",
            other
        ),
    }

    Ok(config)
}
