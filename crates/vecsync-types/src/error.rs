//! Configuration error type shared by all vecsync crates.

use thiserror::Error;

/// Fatal configuration errors.
///
/// Raised at initialization and aborting startup: invalid settings,
/// an index whose dimension disagrees with the configured one, or an
/// unsupported provider/model combination.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Settings failed to load or deserialize
    #[error("Failed to load configuration: {0}")]
    Load(String),

    /// A setting has an invalid value
    #[error("Invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    /// Vector length disagrees with the configured embedding size
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Provider, model or platform not supported
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl ConfigError {
    pub fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key,
            reason: reason.into(),
        }
    }
}
