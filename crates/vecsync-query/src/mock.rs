//! Canned semantic search for tests.

use std::sync::Mutex;

use async_trait::async_trait;
use vecsync_types::NoteId;

use crate::error::QueryError;
use crate::rewrite::SemanticSearch;

/// Returns fixed ids (truncated to `k`) and records every call.
#[derive(Default)]
pub struct MockSemanticSearch {
    ids: Vec<NoteId>,
    fail: bool,
    calls: Mutex<Vec<(String, usize)>>,
}

impl MockSemanticSearch {
    pub fn with_ids(ids: Vec<NoteId>) -> Self {
        Self {
            ids,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// `(text, k)` for every call so far.
    pub fn calls(&self) -> Vec<(String, usize)> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl SemanticSearch for MockSemanticSearch {
    async fn search_ids(&self, text: &str, k: usize) -> Result<Vec<NoteId>, QueryError> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((text.to_string(), k));
        if self.fail {
            return Err(QueryError::Search("mock search unavailable".to_string()));
        }
        Ok(self.ids.iter().copied().take(k).collect())
    }
}
