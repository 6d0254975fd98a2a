//! Engine configuration.

use std::path::PathBuf;

use vecsync_types::{ConfigError, DiffStrategy, DistanceMetric, Settings};

/// Configuration for the sync engine.
///
/// The engine is bound to one configuration for its lifetime; a changed
/// configuration means a new engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Embedding model whose vectors the index should hold
    pub model_name: String,
    /// Vector length produced by the model
    pub embedding_size: usize,
    /// Records per provider call
    pub batch_size: usize,
    /// How pending records are selected
    pub diff_strategy: DiffStrategy,
    /// Index metric, fixed when the index is created
    pub metric: DistanceMetric,
    /// Directory holding the ANN file and the sync metadata
    pub index_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_name: "nomic-embed-text".to_string(),
            embedding_size: 768,
            batch_size: 128,
            diff_strategy: DiffStrategy::Watermark,
            metric: DistanceMetric::Cos,
            index_path: PathBuf::from("./vector-index"),
        }
    }
}

impl EngineConfig {
    pub fn new(
        model_name: impl Into<String>,
        embedding_size: usize,
        index_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            embedding_size,
            index_path: index_path.into(),
            ..Default::default()
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            model_name: settings.model_name.clone(),
            embedding_size: settings.embedding_size,
            batch_size: settings.batch_size,
            diff_strategy: settings.diff_strategy,
            metric: settings.metric,
            index_path: settings.expanded_index_path(),
        }
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_diff_strategy(mut self, strategy: DiffStrategy) -> Self {
        self.diff_strategy = strategy;
        self
    }

    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model_name.trim().is_empty() {
            return Err(ConfigError::invalid("model_name", "must not be empty"));
        }
        if self.embedding_size == 0 {
            return Err(ConfigError::invalid("embedding_size", "must be positive"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size", "must be positive"));
        }
        Ok(())
    }

    /// Directory of the sync metadata database.
    pub fn metadata_path(&self) -> PathBuf {
        self.index_path.join("meta")
    }
}
