//! Vector store error types.

use thiserror::Error;

/// Errors that can occur during vector index and metadata operations.
#[derive(Debug, Error)]
pub enum VectorError {
    /// usearch index error
    #[error("Index error: {0}")]
    Index(String),

    /// Vector length disagrees with the index dimension
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// RocksDB error
    #[error("Database error: {0}")]
    Database(#[from] rocksdb::Error),

    /// Column family missing from an opened database
    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),
}

impl From<serde_json::Error> for VectorError {
    fn from(err: serde_json::Error) -> Self {
        VectorError::Serialization(err.to_string())
    }
}
