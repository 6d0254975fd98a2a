//! # vecsync-vector
//!
//! Persistent state owned by the sync engine.
//!
//! - [`HnswIndex`]: vectors keyed by record id in a usearch HNSW index,
//!   with upsert-by-id, delete-by-ids and k-nearest-neighbor search
//! - [`SyncMetadataStore`]: the singleton `{model, watermark}` row in RocksDB
//!
//! The record id is the usearch key, so an id appears at most once and an
//! upsert replaces whatever was stored for it.

pub mod error;
pub mod hnsw;
pub mod index;
pub mod metadata;

pub use error::VectorError;
pub use hnsw::{HnswConfig, HnswIndex};
pub use index::{IndexStats, SearchResult, VectorIndex};
pub use metadata::{SyncMetadata, SyncMetadataStore, CF_SYNC_META};
