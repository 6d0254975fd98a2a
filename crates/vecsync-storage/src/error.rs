//! Storage layer error types.

use thiserror::Error;
use vecsync_types::{ModTime, NoteId};

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// RocksDB operation failed
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// Column family not found
    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),

    /// Key encoding/decoding error
    #[error("Key error: {0}")]
    Key(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Record rejected before writing
    #[error("Invalid record {id}: {reason}")]
    InvalidRecord { id: NoteId, reason: String },

    /// Modification time did not increase
    #[error("Stale modification time for record {id}: stored {stored}, given {given}")]
    StaleModTime {
        id: NoteId,
        stored: ModTime,
        given: ModTime,
    },
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
