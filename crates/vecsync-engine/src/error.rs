//! Error types for the sync engine.

use thiserror::Error;
use vecsync_embeddings::EmbeddingError;
use vecsync_storage::StorageError;
use vecsync_types::ConfigError;
use vecsync_vector::VectorError;

/// Errors surfaced by the sync engine.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Invalid settings or a dimension that disagrees with the index
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Embedding call failed
    #[error("Embedding provider error: {0}")]
    Provider(#[from] EmbeddingError),

    /// Record store read failed
    #[error("Record store error: {0}")]
    Storage(#[from] StorageError),

    /// Vector index write, delete or save failed
    #[error("Vector index error: {0}")]
    Vector(VectorError),

    /// Sync metadata read or write failed
    #[error("Sync metadata error: {0}")]
    Metadata(VectorError),

    /// A lock was poisoned by a panicking holder
    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<VectorError> for SyncError {
    fn from(err: VectorError) -> Self {
        match err {
            VectorError::DimensionMismatch { expected, actual } => {
                SyncError::Config(ConfigError::DimensionMismatch { expected, actual })
            }
            other => SyncError::Vector(other),
        }
    }
}

impl SyncError {
    /// Whether the error aborts the operation that raised it.
    ///
    /// Provider failures are recovered by skipping the batch and retrying on
    /// a later pass; everything else stops the current pass.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SyncError::Provider(_))
    }
}
