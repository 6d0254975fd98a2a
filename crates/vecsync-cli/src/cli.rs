//! CLI argument parsing for vecsync.
//!
//! CLI flags override all other config sources.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// vecsync
///
/// Semantic search over a local record store.
#[derive(Parser, Debug)]
#[command(name = "vecsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/vecsync/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override record store path
    #[arg(long, global = true)]
    pub db_path: Option<String>,

    /// Override vector index path
    #[arg(long, global = true)]
    pub index_path: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load records from a JSON-lines file into the record store
    ///
    /// One object per line: {"id": 1, "fields": ["front", "back"], "mod_time": 1700000000}.
    /// `mod_time` is optional and defaults to the next free modification time.
    Import {
        /// JSON-lines file
        file: PathBuf,
    },

    /// Create or update one record and index it immediately
    Add {
        /// Record id (non-zero)
        id: u64,

        /// Field values, in order
        #[arg(required = true)]
        fields: Vec<String>,

        /// Modification time (default: next free modification time)
        #[arg(long)]
        mod_time: Option<i64>,
    },

    /// Delete records and their vectors
    Delete {
        /// Record ids
        #[arg(required = true)]
        ids: Vec<u64>,
    },

    /// Bring the vector index up to date (Ctrl+C cancels between batches)
    Sync,

    /// Nearest records to a free-text query
    Search {
        /// Query text
        query: String,

        /// Maximum results (default: search_results_limit)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Rewrite a search string containing a semantic clause
    Rewrite {
        /// Full search string, e.g. "deck:math vec:fractions"
        query: String,
    },

    /// Show index and sync status
    Status,
}
