//! Column family definitions for RocksDB.
//!
//! - records: record bodies keyed by id
//! - records_by_mtime: empty-valued index entries keyed by (mod_time, id)
//! - graves: tombstones for deleted records

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for record bodies
pub const CF_RECORDS: &str = "records";

/// Column family name for the modification-time index
pub const CF_RECORDS_BY_MTIME: &str = "records_by_mtime";

/// Column family name for deletion tombstones
pub const CF_GRAVES: &str = "graves";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[CF_RECORDS, CF_RECORDS_BY_MTIME, CF_GRAVES];

/// Record bodies are text-heavy
fn records_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_RECORDS, records_options()),
        ColumnFamilyDescriptor::new(CF_RECORDS_BY_MTIME, Options::default()),
        ColumnFamilyDescriptor::new(CF_GRAVES, Options::default()),
    ]
}
