//! vecsync command-line host.
//!
//! Drives the sync engine the way a host application would: records live in
//! a local RocksDB store, edits and deletes go through [`HostHooks`], and
//! search strings are rewritten before they are printed.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations
//!
//! [`HostHooks`]: vecsync_engine::HostHooks

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands};
pub use commands::{
    add_record, delete_records, import_records, init_logging, load_settings, rewrite_query,
    search, show_status, sync,
};
