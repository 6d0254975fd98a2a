//! Sync engine for vecsync.
//!
//! Keeps a vector index in step with a mutable record store and answers
//! nearest-neighbor queries against it.
//!
//! ## Key Components
//!
//! - [`SyncEngine`]: diffing, batched embedding, watermark and model tracking
//! - [`EngineConfig`]: model, dimension, batch size and diff strategy
//! - [`ProgressSink`]: progress reporting and cooperative cancellation
//! - [`HostHooks`]: the lifecycle entry points a host application calls
//!
//! ## Sync pass
//!
//! 1. Compare the stored model name with the configured one; on mismatch the
//!    index is emptied and the watermark starts over at zero
//! 2. Remove vectors of records the store reports as deleted
//! 3. Select pending records (modified after the watermark, or absent from the index)
//! 4. Embed them in fixed-size batches, one provider call per batch
//! 5. Advance the watermark, unless the pass was cancelled
//!
//! A failed batch is logged and skipped; the watermark is held below its
//! records so the next pass retries them.

pub mod config;
pub mod diff;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod progress;
pub mod state;

pub use config::EngineConfig;
pub use engine::SyncEngine;
pub use error::SyncError;
pub use hooks::HostHooks;
pub use progress::{CancellableProgress, LoggingProgress, NoOpProgress, ProgressSink, SyncProgress};
pub use state::{BatchStats, EngineState, EngineStatus, ModelChange, ReconcileOutcome};
