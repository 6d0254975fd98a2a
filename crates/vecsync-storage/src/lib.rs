//! Record store for vecsync.
//!
//! The sync engine reads records through the [`RecordStore`] trait. This
//! crate also ships [`RecordDb`], a RocksDB implementation used by the
//! `vecsync` binary and by tests:
//! - Column family isolation for records, the modification-time index and tombstones
//! - Zero-padded keys so modification-time range scans are lexicographic
//! - Atomic writes via WriteBatch, so the record and its index entry never diverge

pub mod column_families;
pub mod db;
pub mod error;
pub mod keys;
pub mod store;

pub use db::{RecordDb, StoreStats};
pub use error::StorageError;
pub use keys::{GraveKey, ModTimeKey, RecordKey};
pub use store::RecordStore;
