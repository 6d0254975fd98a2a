//! RocksDB wrapper for the record store.
//!
//! Provides:
//! - Database open with column family setup
//! - Atomic record writes (body + modification-time index + tombstone removal)
//! - Deletes that leave tombstones behind for later catch-up
//! - Snapshot-consistent modification-time range scans backing [`RecordStore`]
//! - Tombstone pruning once deletions have reached the index

use std::path::Path;

use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, Direction, IteratorMode, Options, Snapshot, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use vecsync_types::{ModTime, NoteId, Record};

use crate::column_families::{build_cf_descriptors, CF_GRAVES, CF_RECORDS, CF_RECORDS_BY_MTIME};
use crate::error::StorageError;
use crate::keys::{GraveKey, ModTimeKey, RecordKey};
use crate::store::RecordStore;

#[derive(Debug, Serialize, Deserialize)]
struct Tombstone {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    deleted_at: DateTime<Utc>,
}

/// Store statistics
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub record_count: u64,
    pub tombstone_count: u64,
    pub disk_usage_bytes: u64,
}

/// RocksDB-backed record store
pub struct RecordDb {
    db: DB,
}

impl RecordDb {
    /// Open storage at the given path, creating if necessary
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening record store at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(4);

        let db = DB::open_cf_descriptors(&db_opts, path, build_cf_descriptors())?;
        Ok(Self { db })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    /// Create or replace a record.
    ///
    /// Ids must be non-zero and a replacement must carry a strictly larger
    /// `mod_time` than the stored version. Writing a record clears any
    /// tombstone left for its id.
    pub fn put_record(&self, record: &Record) -> Result<(), StorageError> {
        if record.id == 0 {
            return Err(StorageError::InvalidRecord {
                id: record.id,
                reason: "record ids must be non-zero".to_string(),
            });
        }
        let new_mtime_key = ModTimeKey::new(record.mod_time, record.id)?;

        let records_cf = self.cf(CF_RECORDS)?;
        let mtime_cf = self.cf(CF_RECORDS_BY_MTIME)?;
        let graves_cf = self.cf(CF_GRAVES)?;

        let mut batch = WriteBatch::default();
        if let Some(old) = self.get_record(record.id)? {
            if record.mod_time <= old.mod_time {
                return Err(StorageError::StaleModTime {
                    id: record.id,
                    stored: old.mod_time,
                    given: record.mod_time,
                });
            }
            batch.delete_cf(mtime_cf, ModTimeKey::new(old.mod_time, old.id)?.to_bytes());
        }

        batch.put_cf(
            records_cf,
            RecordKey::new(record.id).to_bytes(),
            serde_json::to_vec(record)?,
        );
        batch.put_cf(mtime_cf, new_mtime_key.to_bytes(), b"");
        batch.delete_cf(graves_cf, GraveKey::new(record.id).to_bytes());

        self.db.write(batch)?;
        debug!(note_id = record.id, mod_time = record.mod_time, "Stored record");
        Ok(())
    }

    /// Get a record by id
    pub fn get_record(&self, id: NoteId) -> Result<Option<Record>, StorageError> {
        match self.db.get_cf(self.cf(CF_RECORDS)?, RecordKey::new(id).to_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Delete records, leaving a tombstone for each one that existed.
    ///
    /// Returns the number of records removed; unknown ids are ignored.
    pub fn delete_records(&self, ids: &[NoteId]) -> Result<usize, StorageError> {
        let records_cf = self.cf(CF_RECORDS)?;
        let mtime_cf = self.cf(CF_RECORDS_BY_MTIME)?;
        let graves_cf = self.cf(CF_GRAVES)?;

        let tombstone = serde_json::to_vec(&Tombstone {
            deleted_at: Utc::now(),
        })?;

        let mut batch = WriteBatch::default();
        let mut removed = 0;
        for &id in ids {
            let Some(old) = self.get_record(id)? else {
                continue;
            };
            batch.delete_cf(records_cf, RecordKey::new(id).to_bytes());
            batch.delete_cf(mtime_cf, ModTimeKey::new(old.mod_time, id)?.to_bytes());
            batch.put_cf(graves_cf, GraveKey::new(id).to_bytes(), &tombstone);
            removed += 1;
        }

        self.db.write(batch)?;
        debug!(requested = ids.len(), removed, "Deleted records");
        Ok(removed)
    }

    /// A modification time guaranteed to exceed every stored one.
    pub fn next_mod_time(&self) -> Result<ModTime, StorageError> {
        let now = Utc::now().timestamp();
        Ok(match self.max_mod_time()? {
            Some(max) if max >= now => max + 1,
            _ => now,
        })
    }

    /// Flush all column families to disk.
    pub fn flush(&self) -> Result<(), StorageError> {
        for name in [CF_RECORDS, CF_RECORDS_BY_MTIME, CF_GRAVES] {
            self.db.flush_cf(self.cf(name)?)?;
        }
        debug!("Flushed record store");
        Ok(())
    }

    /// Get store statistics.
    pub fn get_stats(&self) -> Result<StoreStats, StorageError> {
        Ok(StoreStats {
            record_count: self.count_cf_entries(self.cf(CF_RECORDS)?)?,
            tombstone_count: self.count_cf_entries(self.cf(CF_GRAVES)?)?,
            disk_usage_bytes: self.get_disk_usage(),
        })
    }

    fn count_cf_entries(&self, cf: &ColumnFamily) -> Result<u64, StorageError> {
        let mut count = 0u64;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn get_disk_usage(&self) -> u64 {
        std::fs::read_dir(self.db.path())
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|e| e.metadata().ok())
                    .map(|m| m.len())
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Records with `mod_time > watermark` for which `keep` holds, ascending.
    ///
    /// The index scan and the body reads share one snapshot, so records
    /// deleted mid-scan are still returned whole.
    fn records_after(
        &self,
        watermark: ModTime,
        keep: &dyn Fn(NoteId) -> bool,
    ) -> Result<Vec<Record>, StorageError> {
        let snapshot = self.db.snapshot();
        self.records_after_in(&snapshot, watermark, keep)
    }

    fn records_after_in(
        &self,
        snapshot: &Snapshot<'_>,
        watermark: ModTime,
        keep: &dyn Fn(NoteId) -> bool,
    ) -> Result<Vec<Record>, StorageError> {
        let start = ModTimeKey::scan_start_after(watermark);
        let iter = snapshot.iterator_cf(
            self.cf(CF_RECORDS_BY_MTIME)?,
            IteratorMode::From(start.as_slice(), Direction::Forward),
        );
        let records_cf = self.cf(CF_RECORDS)?;

        let mut records = Vec::new();
        for item in iter {
            let (key, _) = item?;
            let key = ModTimeKey::from_bytes(&key)?;
            if !keep(key.id) {
                continue;
            }
            match snapshot.get_cf(records_cf, RecordKey::new(key.id).to_bytes())? {
                Some(bytes) => records.push(serde_json::from_slice(&bytes)?),
                None => {
                    return Err(StorageError::Key(format!(
                        "Index entry without record: {}",
                        key.id
                    )))
                }
            }
        }
        Ok(records)
    }

    /// Drop tombstones once their vectors are gone for good.
    ///
    /// Returns how many were removed; ids without a tombstone are ignored.
    pub fn forget_tombstones(&self, ids: &[NoteId]) -> Result<usize, StorageError> {
        let graves_cf = self.cf(CF_GRAVES)?;
        let mut batch = WriteBatch::default();
        let mut removed = 0;
        for &id in ids {
            let key = GraveKey::new(id).to_bytes();
            if self.db.get_cf(graves_cf, &key)?.is_some() {
                batch.delete_cf(graves_cf, key);
                removed += 1;
            }
        }
        self.db.write(batch)?;
        debug!(requested = ids.len(), removed, "Pruned tombstones");
        Ok(removed)
    }
}

impl RecordStore for RecordDb {
    fn count_modified_since(&self, watermark: ModTime) -> Result<u64, StorageError> {
        let start = ModTimeKey::scan_start_after(watermark);
        let iter = self.db.iterator_cf(
            self.cf(CF_RECORDS_BY_MTIME)?,
            IteratorMode::From(start.as_slice(), Direction::Forward),
        );
        let mut count = 0u64;
        for item in iter {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn max_mod_time(&self) -> Result<Option<ModTime>, StorageError> {
        let mut iter = self
            .db
            .iterator_cf(self.cf(CF_RECORDS_BY_MTIME)?, IteratorMode::End);
        match iter.next() {
            Some(item) => {
                let (key, _) = item?;
                Ok(Some(ModTimeKey::from_bytes(&key)?.mod_time))
            }
            None => Ok(None),
        }
    }

    fn records_modified_since(&self, watermark: ModTime) -> Result<Vec<Record>, StorageError> {
        self.records_after(watermark, &|_| true)
    }

    fn records_missing_from(
        &self,
        indexed: &dyn Fn(NoteId) -> bool,
    ) -> Result<Vec<Record>, StorageError> {
        self.records_after(-1, &|id| !indexed(id))
    }

    fn deleted_record_ids(&self) -> Result<Vec<NoteId>, StorageError> {
        let mut ids = Vec::new();
        for item in self.db.iterator_cf(self.cf(CF_GRAVES)?, IteratorMode::Start) {
            let (key, _) = item?;
            ids.push(GraveKey::from_bytes(&key)?.id);
        }
        Ok(ids)
    }

    fn forget_deleted(&self, ids: &[NoteId]) -> Result<usize, StorageError> {
        self.forget_tombstones(ids)
    }
}
