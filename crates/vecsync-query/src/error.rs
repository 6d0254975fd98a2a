//! Query rewrite error types.

use thiserror::Error;

/// Errors that can occur while rewriting a query.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The semantic search behind the rewrite failed
    #[error("Semantic search failed: {0}")]
    Search(String),
}
