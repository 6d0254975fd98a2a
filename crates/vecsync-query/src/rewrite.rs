//! Query parsing, rendering and the rewriter itself.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};
use vecsync_types::{NoteId, Settings};

use crate::error::QueryError;

/// Id no record can have; `nid:0` matches nothing.
pub const MATCH_NOTHING_ID: NoteId = 0;

/// Nearest-neighbor lookup used to answer the semantic portion.
///
/// Implementations embed `text` as a query and return at most `k` ids,
/// closest first.
#[async_trait]
pub trait SemanticSearch: Send + Sync {
    async fn search_ids(&self, text: &str, k: usize) -> Result<Vec<NoteId>, QueryError>;
}

#[async_trait]
impl<T: SemanticSearch + ?Sized> SemanticSearch for Arc<T> {
    async fn search_ids(&self, text: &str, k: usize) -> Result<Vec<NoteId>, QueryError> {
        (**self).search_ids(text, k).await
    }
}

/// A search string split on the vector marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedQuery<'a> {
    /// Text before the marker, trimmed. The whole trimmed input when there is no marker.
    pub regular: &'a str,
    /// Text after the marker, trimmed. `None` when the marker is absent.
    pub semantic: Option<&'a str>,
}

/// Split `text` on the first occurrence of `marker`.
pub fn split_query<'a>(text: &'a str, marker: &str) -> ParsedQuery<'a> {
    if marker.is_empty() {
        return ParsedQuery {
            regular: text.trim(),
            semantic: None,
        };
    }
    match text.split_once(marker) {
        Some((regular, semantic)) => ParsedQuery {
            regular: regular.trim(),
            semantic: Some(semantic.trim()),
        },
        None => ParsedQuery {
            regular: text.trim(),
            semantic: None,
        },
    }
}

/// Render ids as a parenthesized disjunction: `(nid:5 OR nid:9)`.
///
/// No ids renders `(nid:0)`, which matches no record.
pub fn render_id_filter(id_field: &str, ids: &[NoteId]) -> String {
    if ids.is_empty() {
        return format!("({}:{})", id_field, MATCH_NOTHING_ID);
    }
    let clauses: Vec<String> = ids.iter().map(|id| format!("{}:{}", id_field, id)).collect();
    format!("({})", clauses.join(" OR "))
}

/// Append `filter` to the regular portion with a single space.
pub fn join_query(regular: &str, filter: &str) -> String {
    if regular.is_empty() {
        filter.to_string()
    } else {
        format!("{} {}", regular, filter)
    }
}

/// Rewrite `text`, answering its semantic portion with `search`.
pub async fn rewrite_query(
    search: &dyn SemanticSearch,
    text: &str,
    marker: &str,
    id_field: &str,
    k: usize,
) -> Result<String, QueryError> {
    let parsed = split_query(text, marker);
    let Some(semantic) = parsed.semantic else {
        return Ok(parsed.regular.to_string());
    };

    let ids = if semantic.is_empty() || k == 0 {
        Vec::new()
    } else {
        search.search_ids(semantic, k).await?
    };
    debug!(semantic = %semantic, k, found = ids.len(), "Rewrote vector clause");

    Ok(join_query(parsed.regular, &render_id_filter(id_field, &ids)))
}

/// Rewriter settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriterConfig {
    /// Literal token introducing the semantic portion
    pub marker: String,
    /// Field name in the host's id-equality clause
    pub id_field: String,
    /// Number of nearest neighbors substituted into the query
    pub limit: usize,
}

impl Default for RewriterConfig {
    fn default() -> Self {
        Self {
            marker: "vec:".to_string(),
            id_field: "nid".to_string(),
            limit: 20,
        }
    }
}

impl RewriterConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            marker: settings.vector_marker.clone(),
            id_field: settings.id_field.clone(),
            limit: settings.search_results_limit,
        }
    }
}

/// Query rewriter bound to one search backend.
pub struct QueryRewriter<S: SemanticSearch> {
    search: S,
    config: RewriterConfig,
}

impl<S: SemanticSearch> QueryRewriter<S> {
    pub fn new(search: S, config: RewriterConfig) -> Self {
        Self { search, config }
    }

    pub fn config(&self) -> &RewriterConfig {
        &self.config
    }

    /// Rewrite with the configured marker and limit.
    pub async fn rewrite(&self, text: &str) -> Result<String, QueryError> {
        rewrite_query(
            &self.search,
            text,
            &self.config.marker,
            &self.config.id_field,
            self.config.limit,
        )
        .await
    }

    /// Rewrite, substituting the match-nothing filter if search fails.
    ///
    /// The host's text search must keep working when the vector layer is down,
    /// and an unanswered semantic clause must not widen the result set.
    pub async fn rewrite_or_match_nothing(&self, text: &str) -> String {
        match self.rewrite(text).await {
            Ok(rewritten) => rewritten,
            Err(e) => {
                warn!(error = %e, "Vector search failed, vector clause matches nothing");
                let parsed = split_query(text, &self.config.marker);
                join_query(
                    parsed.regular,
                    &render_id_filter(&self.config.id_field, &[]),
                )
            }
        }
    }
}
