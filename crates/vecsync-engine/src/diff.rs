//! Pending-record selection and watermark arithmetic.

use vecsync_storage::{RecordStore, StorageError};
use vecsync_types::{DiffStrategy, ModTime, NoteId, Record};

/// Records the next pass must embed, ordered by ascending `mod_time`.
///
/// `indexed` answers whether the index already holds an id; only the
/// absence strategy consults it.
pub fn select_pending(
    store: &dyn RecordStore,
    strategy: DiffStrategy,
    watermark: ModTime,
    indexed: &dyn Fn(NoteId) -> bool,
) -> Result<Vec<Record>, StorageError> {
    let mut pending = match strategy {
        DiffStrategy::Watermark => store.records_modified_since(watermark)?,
        DiffStrategy::Absence => store.records_missing_from(indexed)?,
    };
    pending.sort_by_key(|r| r.mod_time);
    Ok(pending)
}

/// Watermark after a completed pass.
///
/// Without failures the watermark moves to `max_mod_time`. With failures it
/// stops just below the oldest failed record so the next pass retries it,
/// and never beyond `max_mod_time`. It never moves backwards.
pub fn next_watermark(
    previous: ModTime,
    max_mod_time: ModTime,
    min_failed_mod_time: Option<ModTime>,
) -> ModTime {
    let target = match min_failed_mod_time {
        Some(failed) => failed.saturating_sub(1).min(max_mod_time),
        None => max_mod_time,
    };
    previous.max(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_watermark_without_failures() {
        assert_eq!(next_watermark(100, 250, None), 250);
    }

    #[test]
    fn test_next_watermark_holds_back_before_failed_record() {
        assert_eq!(next_watermark(100, 250, Some(180)), 179);
    }

    #[test]
    fn test_next_watermark_never_regresses() {
        assert_eq!(next_watermark(300, 250, None), 300);
        assert_eq!(next_watermark(100, 250, Some(50)), 100);
    }

    #[test]
    fn test_next_watermark_capped_by_upper_bound() {
        assert_eq!(next_watermark(100, 250, Some(400)), 250);
    }
}
