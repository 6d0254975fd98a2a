//! Key encoding and decoding for storage layer.
//!
//! Numbers are zero-padded to 20 digits so lexicographic key order equals
//! numeric order:
//! - `rec:{id}` record bodies
//! - `mt:{mod_time}:{id}` modification-time index
//! - `grave:{id}` tombstones

use vecsync_types::{ModTime, NoteId};

use crate::error::StorageError;

fn parse_u64(part: &str, what: &str) -> Result<u64, StorageError> {
    part.parse()
        .map_err(|e| StorageError::Key(format!("Invalid {}: {}", what, e)))
}

fn utf8(bytes: &[u8]) -> Result<&str, StorageError> {
    std::str::from_utf8(bytes).map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))
}

/// Key for record bodies
/// Format: rec:{id:020}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordKey {
    pub id: NoteId,
}

impl RecordKey {
    pub fn new(id: NoteId) -> Self {
        Self { id }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("rec:{:020}", self.id).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = utf8(bytes)?;
        match s.split_once(':') {
            Some(("rec", id)) => Ok(Self::new(parse_u64(id, "record id")?)),
            _ => Err(StorageError::Key(format!("Invalid record key format: {}", s))),
        }
    }
}

/// Key for the modification-time index
/// Format: mt:{mod_time:020}:{id:020}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModTimeKey {
    pub mod_time: ModTime,
    pub id: NoteId,
}

impl ModTimeKey {
    /// Modification times must be non-negative to keep key order numeric.
    pub fn new(mod_time: ModTime, id: NoteId) -> Result<Self, StorageError> {
        if mod_time < 0 {
            return Err(StorageError::Key(format!(
                "Negative modification time {} for record {}",
                mod_time, id
            )));
        }
        Ok(Self { mod_time, id })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("mt:{:020}:{:020}", self.mod_time, self.id).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = utf8(bytes)?;
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 || parts[0] != "mt" {
            return Err(StorageError::Key(format!("Invalid mtime key format: {}", s)));
        }
        let mod_time = parse_u64(parts[1], "mod_time")? as ModTime;
        let id = parse_u64(parts[2], "record id")?;
        Ok(Self { mod_time, id })
    }

    /// First key with modification time strictly greater than `watermark`.
    pub fn scan_start_after(watermark: ModTime) -> Vec<u8> {
        let from = watermark.saturating_add(1).max(0);
        format!("mt:{:020}:", from).into_bytes()
    }
}

/// Key for tombstones
/// Format: grave:{id:020}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraveKey {
    pub id: NoteId,
}

impl GraveKey {
    pub fn new(id: NoteId) -> Self {
        Self { id }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("grave:{:020}", self.id).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = utf8(bytes)?;
        match s.split_once(':') {
            Some(("grave", id)) => Ok(Self::new(parse_u64(id, "record id")?)),
            _ => Err(StorageError::Key(format!("Invalid grave key format: {}", s))),
        }
    }
}
