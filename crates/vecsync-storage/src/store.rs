//! The record store interface the sync engine consumes.

use vecsync_types::{ModTime, NoteId, Record};

use crate::error::StorageError;

/// Read access to the host's records.
///
/// Implementations must be thread-safe; the engine reads from its sync task
/// while the host keeps writing.
pub trait RecordStore: Send + Sync {
    /// Number of records with `mod_time > watermark`.
    fn count_modified_since(&self, watermark: ModTime) -> Result<u64, StorageError>;

    /// Largest `mod_time` over all records, `None` when the store is empty.
    fn max_mod_time(&self) -> Result<Option<ModTime>, StorageError>;

    /// Records with `mod_time > watermark`, ordered by ascending `mod_time`.
    fn records_modified_since(&self, watermark: ModTime) -> Result<Vec<Record>, StorageError>;

    /// Records for which `indexed` returns false, ordered by ascending `mod_time`.
    fn records_missing_from(
        &self,
        indexed: &dyn Fn(NoteId) -> bool,
    ) -> Result<Vec<Record>, StorageError>;

    /// Ids of records deleted from the store.
    fn deleted_record_ids(&self) -> Result<Vec<NoteId>, StorageError>;

    /// Called once the deletions of `ids` are persisted in the index, so the
    /// store may drop their tombstones. Returns how many were dropped.
    fn forget_deleted(&self, _ids: &[NoteId]) -> Result<usize, StorageError> {
        Ok(0)
    }
}
