//! vecsync
//!
//! Keeps a vector index in step with a local record store and rewrites
//! search strings containing a semantic clause.
//!
//! # Usage
//!
//! ```bash
//! vecsync import records.jsonl
//! vecsync sync
//! vecsync search "fractions with unlike denominators"
//! vecsync rewrite "deck:math vec:fractions"
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/vecsync/config.toml)
//! 3. Environment variables (VECSYNC_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use vecsync_cli::{
    add_record, delete_records, import_records, init_logging, load_settings, rewrite_query,
    search, show_status, sync, Cli, Commands,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    init_logging(&settings.log_level)?;

    match cli.command {
        Commands::Import { file } => {
            import_records(&settings, &file)?;
        }
        Commands::Add {
            id,
            fields,
            mod_time,
        } => {
            add_record(&settings, id, fields, mod_time).await?;
        }
        Commands::Delete { ids } => {
            delete_records(&settings, &ids)?;
        }
        Commands::Sync => {
            sync(&settings).await?;
        }
        Commands::Search { query, limit } => {
            search(&settings, &query, limit).await?;
        }
        Commands::Rewrite { query } => {
            rewrite_query(&settings, &query).await?;
        }
        Commands::Status => {
            show_status(&settings)?;
        }
    }

    Ok(())
}
