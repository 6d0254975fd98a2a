//! Engine state and the results of sync operations.

use serde::Serialize;
use vecsync_types::{DiffStrategy, DistanceMetric, ModTime};

use crate::progress::SyncProgress;

/// Engine lifecycle.
///
/// `Initializing → (ModelMismatch → Rebuilding →) Reconciled ⇄ Syncing`
///
/// There is no uninitialized state: an engine exists only once
/// [`SyncEngine::open`](crate::SyncEngine::open) has succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Initializing,
    ModelMismatch,
    Rebuilding,
    Reconciled,
    Syncing,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Initializing => "initializing",
            EngineState::ModelMismatch => "model_mismatch",
            EngineState::Rebuilding => "rebuilding",
            EngineState::Reconciled => "reconciled",
            EngineState::Syncing => "syncing",
        }
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statistics for one run over a list of pending records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    /// Records handed in
    pub total: usize,
    /// Records handled before the run ended
    pub processed: usize,
    /// Records embedded and written
    pub indexed: usize,
    /// Records in failed batches
    pub failed: usize,
    /// Blank records, or records deleted mid-batch, left out of the index
    pub skipped: usize,
    /// Provider calls made
    pub batches: usize,
    /// Provider calls that failed
    pub failed_batches: usize,
    /// Smallest `mod_time` among failed records
    pub min_failed_mod_time: Option<ModTime>,
    /// Whether the run stopped early on request
    pub cancelled: bool,
    /// Wall time in milliseconds
    pub elapsed_ms: u64,
}

impl BatchStats {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    pub fn record_failed(&mut self, count: usize, min_mod_time: ModTime) {
        self.failed += count;
        self.failed_batches += 1;
        self.min_failed_mod_time = Some(
            self.min_failed_mod_time
                .map_or(min_mod_time, |m| m.min(min_mod_time)),
        );
    }

    pub fn progress(&self, batches_done: usize, batches_total: usize) -> SyncProgress {
        SyncProgress {
            processed: self.processed,
            total: self.total,
            indexed: self.indexed,
            failed: self.failed,
            skipped: self.skipped,
            batches_done,
            batches_total,
        }
    }
}

/// Informational notice that the index was rebuilt for a new model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelChange {
    pub previous: String,
    pub current: String,
}

/// Result of one `reconcile()` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    /// Set when the stored model differed and the index was emptied
    pub model_change: Option<ModelChange>,
    /// Vectors removed for records deleted from the store
    pub removed: usize,
    /// Records selected for embedding
    pub pending: usize,
    /// Batch run statistics; default when nothing was pending
    pub stats: BatchStats,
    pub watermark_before: ModTime,
    pub watermark_after: ModTime,
}

impl ReconcileOutcome {
    /// Nothing was pending and nothing was removed.
    pub fn is_noop(&self) -> bool {
        self.pending == 0 && self.removed == 0 && self.model_change.is_none()
    }

    pub fn cancelled(&self) -> bool {
        self.stats.cancelled
    }
}

/// Snapshot for status displays.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub state: EngineState,
    /// Configured model
    pub model_name: String,
    /// Model recorded in the sync metadata
    pub indexed_model_name: String,
    pub watermark: ModTime,
    pub dimension: usize,
    pub metric: DistanceMetric,
    pub diff_strategy: DiffStrategy,
    pub vector_count: usize,
    pub index_size_bytes: u64,
    /// Records modified after the watermark
    pub pending: u64,
    pub embedded_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_failed_tracks_minimum() {
        let mut stats = BatchStats::new(10);
        stats.record_failed(2, 500);
        stats.record_failed(3, 300);
        stats.record_failed(1, 400);
        assert_eq!(stats.failed, 6);
        assert_eq!(stats.failed_batches, 3);
        assert_eq!(stats.min_failed_mod_time, Some(300));
    }

    #[test]
    fn test_outcome_noop() {
        let outcome = ReconcileOutcome::default();
        assert!(outcome.is_noop());
        assert!(!outcome.cancelled());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(EngineState::ModelMismatch.to_string(), "model_mismatch");
    }
}
