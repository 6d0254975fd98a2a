//! Record type owned by the host's record store.
//!
//! The sync engine only ever reads records. A record's `mod_time` strictly
//! increases on every create or update and is the watermark dimension.

use serde::{Deserialize, Serialize};

/// Stable record identity. Also used directly as the vector index key.
pub type NoteId = u64;

/// Modification timestamp, monotonically non-decreasing per mutation.
pub type ModTime = i64;

/// Separator between fields in the host's packed field string.
pub const FIELD_SEPARATOR: char = '\u{1f}';

/// A text record as stored by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Stable record id
    pub id: NoteId,
    /// Ordered text fields
    pub fields: Vec<String>,
    /// Modification time of the last create/update
    pub mod_time: ModTime,
}

impl Record {
    pub fn new(id: NoteId, fields: Vec<String>, mod_time: ModTime) -> Self {
        Self {
            id,
            fields,
            mod_time,
        }
    }

    /// Build a record from a packed field string (fields joined by [`FIELD_SEPARATOR`]).
    pub fn from_flds(id: NoteId, flds: &str, mod_time: ModTime) -> Self {
        Self {
            id,
            fields: flds.split(FIELD_SEPARATOR).map(str::to_string).collect(),
            mod_time,
        }
    }

    /// Packed field string, the inverse of [`Record::from_flds`].
    pub fn flds(&self) -> String {
        self.fields.join(&FIELD_SEPARATOR.to_string())
    }

    /// Text handed to the embedding provider: fields joined with a single space.
    ///
    /// The field separator never reaches the provider.
    pub fn document_text(&self) -> String {
        self.fields.join(" ")
    }

    /// True when there is nothing worth embedding.
    pub fn is_blank(&self) -> bool {
        self.fields.iter().all(|f| f.trim().is_empty())
    }
}
