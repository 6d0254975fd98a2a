//! # vecsync-types
//!
//! Shared domain types for the vecsync system.
//!
//! - Records: the host's mutable text records, read by the sync engine
//! - Settings: layered configuration for every component
//! - ConfigError: the fatal, startup-time error class
//!
//! ## Usage
//!
//! ```rust
//! use vecsync_types::Record;
//!
//! let record = Record::from_flds(7, "cat\u{1f}gato", 1_700_000_000);
//! assert_eq!(record.document_text(), "cat gato");
//! ```

pub mod config;
pub mod error;
pub mod record;

pub use config::{DiffStrategy, DistanceMetric, ProviderKind, Settings};
pub use error::ConfigError;
pub use record::{ModTime, NoteId, Record, FIELD_SEPARATOR};
