//! Configuration loading for vecsync.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at ~/.config/vecsync/config.toml.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ConfigError;

/// How the sync engine decides which records are pending.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiffStrategy {
    /// Records with `mod_time` above the stored watermark (default)
    #[default]
    Watermark,
    /// Records whose id is not present in the vector index
    Absence,
}

/// Distance metric, fixed when the index is created.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Cosine distance (default)
    #[default]
    Cos,
    /// Squared Euclidean distance
    L2,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cos => "cos",
            DistanceMetric::L2 => "l2",
        }
    }
}

impl std::fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which embedding service API the provider speaks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Ollama `/api/embed` (default, local)
    #[default]
    Ollama,
    /// OpenAI-compatible `/embeddings`
    Openai,
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Embedding model that produces the index contents
    #[serde(default = "default_model_name")]
    pub model_name: String,

    /// Vector dimension produced by the model
    #[serde(default = "default_embedding_size")]
    pub embedding_size: usize,

    /// Default k for rewritten queries
    #[serde(default = "default_search_results_limit")]
    pub search_results_limit: usize,

    /// Literal token introducing a semantic sub-query
    #[serde(default = "default_vector_marker")]
    pub vector_marker: String,

    /// Records per embedding call during a sync pass
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pending-record selection strategy
    #[serde(default)]
    pub diff_strategy: DiffStrategy,

    /// Distance metric of the vector index
    #[serde(default)]
    pub metric: DistanceMetric,

    /// Embedding service API
    #[serde(default)]
    pub provider: ProviderKind,

    /// Embedding service base URL
    #[serde(default = "default_provider_url")]
    pub provider_url: String,

    /// API key (OpenAI-compatible providers only; loaded from env, not stored in config file)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-request timeout for embedding calls
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Attempts per embedding call before the batch is given up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Role marker prepended to indexed documents
    #[serde(default = "default_document_prefix")]
    pub document_prefix: String,

    /// Role marker prepended to search queries
    #[serde(default = "default_query_prefix")]
    pub query_prefix: String,

    /// Host query-grammar field used for id filters (e.g. `nid:5`)
    #[serde(default = "default_id_field")]
    pub id_field: String,

    /// Path to the record store directory
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Path to the vector index directory
    #[serde(default = "default_index_path")]
    pub index_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_model_name() -> String {
    "nomic-embed-text".to_string()
}

fn default_embedding_size() -> usize {
    768
}

fn default_search_results_limit() -> usize {
    20
}

fn default_vector_marker() -> String {
    "vec:".to_string()
}

fn default_batch_size() -> usize {
    128
}

fn default_provider_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_document_prefix() -> String {
    "search_document: ".to_string()
}

fn default_query_prefix() -> String {
    "search_query: ".to_string()
}

fn default_id_field() -> String {
    "nid".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn data_dir(leaf: &str) -> String {
    ProjectDirs::from("", "", "vecsync")
        .map(|p| p.data_local_dir().join(leaf))
        .unwrap_or_else(|| PathBuf::from(".").join(leaf))
        .to_string_lossy()
        .to_string()
}

fn default_db_path() -> String {
    data_dir("records")
}

fn default_index_path() -> String {
    data_dir("vector-index")
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_name: default_model_name(),
            embedding_size: default_embedding_size(),
            search_results_limit: default_search_results_limit(),
            vector_marker: default_vector_marker(),
            batch_size: default_batch_size(),
            diff_strategy: DiffStrategy::default(),
            metric: DistanceMetric::default(),
            provider: ProviderKind::default(),
            provider_url: default_provider_url(),
            api_key: None,
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            document_prefix: default_document_prefix(),
            query_prefix: default_query_prefix(),
            id_field: default_id_field(),
            db_path: default_db_path(),
            index_path: default_index_path(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/vecsync/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (VECSYNC_*)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, ConfigError> {
        let config_dir = ProjectDirs::from("", "", "vecsync")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("model_name", default_model_name())
            .map_err(|e| ConfigError::Load(e.to_string()))?
            .set_default("embedding_size", default_embedding_size() as i64)
            .map_err(|e| ConfigError::Load(e.to_string()))?
            .set_default("search_results_limit", default_search_results_limit() as i64)
            .map_err(|e| ConfigError::Load(e.to_string()))?
            .set_default("vector_marker", default_vector_marker())
            .map_err(|e| ConfigError::Load(e.to_string()))?
            .set_default("batch_size", default_batch_size() as i64)
            .map_err(|e| ConfigError::Load(e.to_string()))?
            .set_default("db_path", default_db_path())
            .map_err(|e| ConfigError::Load(e.to_string()))?
            .set_default("index_path", default_index_path())
            .map_err(|e| ConfigError::Load(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| ConfigError::Load(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Format: VECSYNC_MODEL_NAME, VECSYNC_EMBEDDING_SIZE, VECSYNC_API_KEY, etc.
        builder = builder.add_source(Environment::with_prefix("VECSYNC").try_parsing(true));

        let config = builder
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model_name.trim().is_empty() {
            return Err(ConfigError::invalid("model_name", "must not be empty"));
        }
        if self.embedding_size == 0 {
            return Err(ConfigError::invalid("embedding_size", "must be > 0"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size", "must be > 0"));
        }
        if self.search_results_limit == 0 {
            return Err(ConfigError::invalid("search_results_limit", "must be > 0"));
        }
        if self.vector_marker.trim().is_empty() {
            return Err(ConfigError::invalid("vector_marker", "must not be empty"));
        }
        if self.id_field.trim().is_empty() {
            return Err(ConfigError::invalid("id_field", "must not be empty"));
        }
        if self.provider == ProviderKind::Openai && self.api_key.is_none() {
            return Err(ConfigError::invalid(
                "api_key",
                "required for the openai provider",
            ));
        }
        Ok(())
    }

    /// Expand ~ in db_path to the home directory
    pub fn expanded_db_path(&self) -> PathBuf {
        expand_home(&self.db_path)
    }

    /// Expand ~ in index_path to the home directory
    pub fn expanded_index_path(&self) -> PathBuf {
        expand_home(&self.index_path)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}
