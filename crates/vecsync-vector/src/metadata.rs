//! Sync metadata storage.
//!
//! A single row recording which model produced the vectors in the index and
//! the modification time up to which records are known to be embedded.
//! Stored in RocksDB next to the index so both survive restarts.

use std::path::Path;

use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Options, DB};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use vecsync_types::{DistanceMetric, ModTime};

use crate::error::VectorError;

/// Column family name for sync metadata
pub const CF_SYNC_META: &str = "sync_meta";

const METADATA_KEY: &[u8] = b"sync_metadata";

/// Persisted sync state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMetadata {
    /// Model whose vectors the index holds
    pub model_name: String,

    /// Every record with `mod_time <= watermark` has a current vector
    pub last_synced_watermark: ModTime,

    /// Vector length of the index
    pub dimension: usize,

    /// Metric the index was created with
    pub metric: DistanceMetric,

    /// Records embedded since the metadata was created or the model changed
    pub embedded_count: u64,

    /// Last update (milliseconds since epoch for JSON compatibility)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,

    /// When this metadata was first created (milliseconds since epoch)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl SyncMetadata {
    /// Metadata for an empty index built with `model_name`.
    pub fn new(model_name: impl Into<String>, dimension: usize, metric: DistanceMetric) -> Self {
        let now = Utc::now();
        Self {
            model_name: model_name.into(),
            last_synced_watermark: 0,
            dimension,
            metric,
            embedded_count: 0,
            updated_at: now,
            created_at: now,
        }
    }

    /// Record progress. The watermark never moves backwards here.
    pub fn advance(&mut self, watermark: ModTime, embedded: u64) {
        self.last_synced_watermark = self.last_synced_watermark.max(watermark);
        self.embedded_count += embedded;
        self.updated_at = Utc::now();
    }

    /// Start over for a different model or index layout.
    pub fn reset(&mut self, model_name: impl Into<String>, dimension: usize, metric: DistanceMetric) {
        self.model_name = model_name.into();
        self.last_synced_watermark = 0;
        self.dimension = dimension;
        self.metric = metric;
        self.embedded_count = 0;
        self.updated_at = Utc::now();
    }

    /// Serialize to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, VectorError> {
        serde_json::to_vec(self).map_err(VectorError::from)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VectorError> {
        serde_json::from_slice(bytes).map_err(VectorError::from)
    }
}

/// Sync metadata storage using RocksDB.
pub struct SyncMetadataStore {
    db: DB,
}

impl SyncMetadataStore {
    /// Open or create metadata storage.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VectorError> {
        let path = path.as_ref();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf = ColumnFamilyDescriptor::new(CF_SYNC_META, Options::default());
        let db = DB::open_cf_descriptors(&opts, path, vec![cf])?;

        info!(path = ?path, "Opened sync metadata storage");
        Ok(Self { db })
    }

    fn cf(&self) -> Result<&ColumnFamily, VectorError> {
        self.db
            .cf_handle(CF_SYNC_META)
            .ok_or_else(|| VectorError::ColumnFamilyNotFound(CF_SYNC_META.to_string()))
    }

    /// Load the stored metadata, if any.
    pub fn load(&self) -> Result<Option<SyncMetadata>, VectorError> {
        match self.db.get_cf(self.cf()?, METADATA_KEY)? {
            Some(bytes) => Ok(Some(SyncMetadata::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Load the stored metadata or create and persist a fresh row.
    ///
    /// The flag is `true` when the row was created by this call.
    pub fn load_or_init(
        &self,
        model_name: &str,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Result<(SyncMetadata, bool), VectorError> {
        if let Some(meta) = self.load()? {
            return Ok((meta, false));
        }
        let meta = SyncMetadata::new(model_name, dimension, metric);
        self.save(&meta)?;
        info!(model = model_name, "Initialized sync metadata");
        Ok((meta, true))
    }

    /// Persist `meta`, replacing the previous row.
    pub fn save(&self, meta: &SyncMetadata) -> Result<(), VectorError> {
        self.db.put_cf(self.cf()?, METADATA_KEY, meta.to_bytes()?)?;
        debug!(
            model = %meta.model_name,
            watermark = meta.last_synced_watermark,
            "Stored sync metadata"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_new_metadata() {
        let meta = SyncMetadata::new("nomic-embed-text", 768, DistanceMetric::Cos);
        assert_eq!(meta.last_synced_watermark, 0);
        assert_eq!(meta.embedded_count, 0);
        assert_eq!(meta.model_name, "nomic-embed-text");
    }

    #[test]
    fn test_advance_never_regresses() {
        let mut meta = SyncMetadata::new("m", 4, DistanceMetric::Cos);
        meta.advance(150, 3);
        meta.advance(120, 1);
        assert_eq!(meta.last_synced_watermark, 150);
        assert_eq!(meta.embedded_count, 4);
    }

    #[test]
    fn test_reset() {
        let mut meta = SyncMetadata::new("a", 4, DistanceMetric::Cos);
        meta.advance(99, 9);
        meta.reset("b", 8, DistanceMetric::L2);
        assert_eq!(meta.model_name, "b");
        assert_eq!(meta.last_synced_watermark, 0);
        assert_eq!(meta.dimension, 8);
        assert_eq!(meta.metric, DistanceMetric::L2);
        assert_eq!(meta.embedded_count, 0);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut meta = SyncMetadata::new("m", 16, DistanceMetric::L2);
        meta.advance(1_700_000_000, 2);
        let decoded = SyncMetadata::from_bytes(&meta.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.last_synced_watermark, meta.last_synced_watermark);
        assert_eq!(decoded.metric, DistanceMetric::L2);
        assert_eq!(
            decoded.created_at.timestamp_millis(),
            meta.created_at.timestamp_millis()
        );
    }

    #[test]
    fn test_load_or_init_persists() {
        let temp = TempDir::new().unwrap();
        {
            let store = SyncMetadataStore::open(temp.path()).unwrap();
            assert!(store.load().unwrap().is_none());

            let (mut meta, created) = store.load_or_init("m", 4, DistanceMetric::Cos).unwrap();
            assert!(created);
            meta.advance(42, 1);
            store.save(&meta).unwrap();
        }

        let store = SyncMetadataStore::open(temp.path()).unwrap();
        let (meta, created) = store.load_or_init("other", 8, DistanceMetric::L2).unwrap();
        assert!(!created);
        assert_eq!(meta.model_name, "m");
        assert_eq!(meta.last_synced_watermark, 42);
    }
}
