//! Embedding error types.

use thiserror::Error;

/// Errors that can occur during embedding operations.
///
/// Every variant fails the whole call; callers never see partial results.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Transport failure or non-success HTTP status
    #[error("Embedding request failed: {0}")]
    Request(String),

    /// Provider asked us to slow down
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Response body could not be understood
    #[error("Failed to parse embedding response: {0}")]
    Parse(String),

    /// Provider returned a different number of vectors than inputs
    #[error("Expected {expected} embeddings, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Client could not be configured
    #[error("Invalid provider configuration: {0}")]
    Config(String),

    /// Injected failure (mock provider)
    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

impl EmbeddingError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EmbeddingError::Request(_) | EmbeddingError::RateLimited | EmbeddingError::Unavailable(_)
        )
    }
}
