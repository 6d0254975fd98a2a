//! Command implementations for vecsync.
//!
//! Every command opens the record store and, when it needs vectors, the
//! sync engine. Only `sync` runs a reconcile; the other commands use the
//! index as it is and leave catch-up to the next `sync`.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vecsync_embeddings::{EmbeddingProvider, HttpEmbedder, HttpEmbedderConfig};
use vecsync_engine::{
    CancellableProgress, EngineConfig, HostHooks, LoggingProgress, SyncEngine,
};
use vecsync_query::RewriterConfig;
use vecsync_storage::RecordDb;
use vecsync_types::{ModTime, NoteId, Record, Settings};

use crate::cli::Cli;

/// Load configuration and apply CLI overrides (highest precedence).
pub fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings =
        Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(db_path) = &cli.db_path {
        settings.db_path = db_path.clone();
    }
    if let Some(index_path) = &cli.index_path {
        settings.index_path = index_path.clone();
    }
    if let Some(log_level) = &cli.log_level {
        settings.log_level = log_level.clone();
    }
    Ok(settings)
}

/// Log to stderr so stdout carries only command output.
pub fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

fn open_store(settings: &Settings) -> Result<Arc<RecordDb>> {
    let db_path = settings.expanded_db_path();
    fs::create_dir_all(&db_path).context("Failed to create record store directory")?;
    let store = RecordDb::open(&db_path)
        .with_context(|| format!("Failed to open record store at {:?}", db_path))?;
    Ok(Arc::new(store))
}

fn open_provider(settings: &Settings) -> Result<Arc<dyn EmbeddingProvider>> {
    let provider = HttpEmbedder::new(HttpEmbedderConfig::from_settings(settings))
        .context("Failed to configure embedding provider")?;
    Ok(Arc::new(provider))
}

/// Open the engine without syncing and wrap it in host hooks.
fn open_hooks(settings: &Settings, store: Arc<RecordDb>) -> Result<HostHooks> {
    let engine = SyncEngine::open(
        EngineConfig::from_settings(settings),
        open_provider(settings)?,
        store,
    )
    .context("Failed to open vector index")?;
    Ok(HostHooks::new(
        Arc::new(engine),
        RewriterConfig::from_settings(settings),
    ))
}

/// One line of an import file.
#[derive(Debug, Deserialize, PartialEq)]
struct ImportLine {
    id: NoteId,
    fields: Vec<String>,
    #[serde(default)]
    mod_time: Option<ModTime>,
}

fn parse_import_line(line: &str) -> Result<ImportLine> {
    serde_json::from_str(line).context("Invalid record line")
}

/// Write every record in a JSON-lines file to the record store.
///
/// Vectors are not touched; run `sync` afterwards.
pub fn import_records(settings: &Settings, file: &Path) -> Result<usize> {
    let reader = BufReader::new(
        fs::File::open(file).with_context(|| format!("Failed to open {:?}", file))?,
    );
    let store = open_store(settings)?;

    let mut imported = 0;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {:?}", file))?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = parse_import_line(&line).with_context(|| format!("Line {}", line_no + 1))?;
        let mod_time = match entry.mod_time {
            Some(mod_time) => mod_time,
            None => store.next_mod_time()?,
        };
        store
            .put_record(&Record::new(entry.id, entry.fields, mod_time))
            .with_context(|| format!("Line {}", line_no + 1))?;
        imported += 1;
    }
    store.flush()?;

    info!(imported, file = ?file, "Imported records");
    println!("Imported {} records", imported);
    Ok(imported)
}

/// Store one record and index it through the edit hook.
pub async fn add_record(
    settings: &Settings,
    id: NoteId,
    fields: Vec<String>,
    mod_time: Option<ModTime>,
) -> Result<()> {
    let store = open_store(settings)?;
    let mod_time = match mod_time {
        Some(mod_time) => mod_time,
        None => store.next_mod_time()?,
    };
    store
        .put_record(&Record::new(id, fields.clone(), mod_time))
        .context("Failed to store record")?;

    let hooks = open_hooks(settings, store)?;
    let indexed = hooks.on_record_created_or_updated(id, &fields).await;
    hooks.on_shutdown();

    if indexed {
        println!("Stored and indexed record {}", id);
    } else {
        println!("Stored record {} (not indexed, next sync retries it)", id);
    }
    Ok(())
}

/// Delete records from the store and their vectors from the index.
pub fn delete_records(settings: &Settings, ids: &[NoteId]) -> Result<()> {
    let store = open_store(settings)?;
    let deleted = store
        .delete_records(ids)
        .context("Failed to delete records")?;

    let hooks = open_hooks(settings, store)?;
    let removed = hooks.on_records_deleted(ids);

    println!("Deleted {} records, removed {} vectors", deleted, removed);
    Ok(())
}

/// Run the startup hook: open the engine and reconcile.
///
/// Ctrl+C cancels between batches; work already committed is kept and the
/// watermark stays where it was.
pub async fn sync(settings: &Settings) -> Result<()> {
    let store = open_store(settings)?;
    let cancel = CancellationToken::new();
    let progress = CancellableProgress::with_token(LoggingProgress::default(), cancel.clone());
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = signal::ctrl_c() => {
                    if result.is_ok() {
                        warn!("Received Ctrl+C, stopping after the current batch");
                        cancel.cancel();
                    }
                }
                _ = cancel.cancelled() => {}
            }
        })
    };

    let result =
        HostHooks::on_init(settings, open_provider(settings)?, store, &progress).await;
    // Releases the signal task
    cancel.cancel();
    let _ = ctrl_c.await;
    let (hooks, outcome) = result.context("Sync failed")?;
    hooks.on_shutdown();

    if let Some(change) = &outcome.model_change {
        println!(
            "Embedding model changed from {} to {}, index rebuilt",
            change.previous, change.current
        );
    }
    if outcome.cancelled() {
        println!(
            "Sync cancelled: {} of {} records indexed, watermark unchanged at {}",
            outcome.stats.indexed, outcome.pending, outcome.watermark_after
        );
        return Ok(());
    }
    println!(
        "Synced {} records ({} indexed, {} skipped, {} failed, {} removed), watermark {}",
        outcome.pending,
        outcome.stats.indexed,
        outcome.stats.skipped,
        outcome.stats.failed,
        outcome.removed,
        outcome.watermark_after
    );
    Ok(())
}

/// Print the nearest records to `query`, closest first.
pub async fn search(settings: &Settings, query: &str, limit: Option<usize>) -> Result<()> {
    let store = open_store(settings)?;
    let hooks = open_hooks(settings, store.clone())?;
    let k = limit.unwrap_or(settings.search_results_limit);

    let results = hooks
        .engine()
        .search_scored(query, k)
        .await
        .context("Vector search failed")?;
    if results.is_empty() {
        println!("No results");
        return Ok(());
    }
    for result in results {
        let preview = store
            .get_record(result.note_id)?
            .map(|r| truncate(&r.document_text(), 80))
            .unwrap_or_default();
        println!("{}\t{:.4}\t{}", result.note_id, result.distance, preview);
    }
    Ok(())
}

/// Print `query` as the host would run it.
pub async fn rewrite_query(settings: &Settings, query: &str) -> Result<()> {
    let store = open_store(settings)?;
    let hooks = open_hooks(settings, store)?;
    println!("{}", hooks.on_search_query(query).await);
    Ok(())
}

/// Print engine and record store status as JSON.
pub fn show_status(settings: &Settings) -> Result<()> {
    let store = open_store(settings)?;
    let store_stats = store.get_stats()?;
    let hooks = open_hooks(settings, store)?;
    let status = hooks.engine().status().context("Failed to read status")?;

    let report = serde_json::json!({
        "engine": status,
        "records": store_stats.record_count,
        "tombstones": store_stats.tombstone_count,
        "store_bytes": store_stats.disk_usage_bytes,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut)
}
