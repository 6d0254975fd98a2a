//! Progress reporting and cooperative cancellation.
//!
//! Sinks are consulted only between batches: a batch in flight always
//! completes or fails before a cancellation takes effect.

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Cumulative progress of a sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncProgress {
    /// Records handled so far (indexed, failed or skipped)
    pub processed: usize,
    /// Records selected for this pass
    pub total: usize,
    /// Records embedded and written
    pub indexed: usize,
    /// Records in failed batches
    pub failed: usize,
    /// Blank records, or records deleted mid-batch, left out of the index
    pub skipped: usize,
    /// Batches finished
    pub batches_done: usize,
    /// Batches planned
    pub batches_total: usize,
}

impl SyncProgress {
    /// Completed share in `[0, 1]`; an empty pass counts as complete.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.processed as f64 / self.total as f64
        }
    }
}

/// Receives progress after each batch and answers whether to stop.
pub trait ProgressSink: Send + Sync {
    /// Called after each batch.
    fn on_progress(&self, progress: &SyncProgress);

    /// Polled before each batch.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// A sink that ignores progress and never cancels.
pub struct NoOpProgress;

impl ProgressSink for NoOpProgress {
    fn on_progress(&self, _progress: &SyncProgress) {}
}

/// A sink that logs progress at info level.
pub struct LoggingProgress {
    every: usize,
}

impl LoggingProgress {
    /// Log every `every` batches (and always the last one).
    pub fn new(every: usize) -> Self {
        Self {
            every: every.max(1),
        }
    }
}

impl Default for LoggingProgress {
    fn default() -> Self {
        Self::new(1)
    }
}

impl ProgressSink for LoggingProgress {
    fn on_progress(&self, progress: &SyncProgress) {
        if progress.batches_done % self.every == 0
            || progress.batches_done == progress.batches_total
        {
            info!(
                processed = progress.processed,
                total = progress.total,
                indexed = progress.indexed,
                failed = progress.failed,
                batch = progress.batches_done,
                batches = progress.batches_total,
                "Sync progress"
            );
        }
    }
}

/// Wraps a sink with a [`CancellationToken`].
///
/// Cancelling the token takes effect at the next batch boundary.
pub struct CancellableProgress<P: ProgressSink> {
    inner: P,
    cancel: CancellationToken,
}

impl<P: ProgressSink> CancellableProgress<P> {
    pub fn new(inner: P) -> Self {
        Self::with_token(inner, CancellationToken::new())
    }

    pub fn with_token(inner: P, cancel: CancellationToken) -> Self {
        Self { inner, cancel }
    }

    /// Token to cancel the pass from another task or a signal handler.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl<P: ProgressSink> ProgressSink for CancellableProgress<P> {
    fn on_progress(&self, progress: &SyncProgress) {
        self.inner.on_progress(progress);
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.inner.is_cancelled()
    }
}
