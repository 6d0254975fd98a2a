//! # vecsync-query
//!
//! Turns `deck:math vec:fractions` into `deck:math (nid:5 OR nid:9)`.
//!
//! The text before the vector marker is passed through; the text after it
//! is answered by a [`SemanticSearch`] implementation and replaced with a
//! disjunction of id clauses in the host's query grammar. A semantic clause
//! with no matches renders as a filter that matches nothing.

pub mod error;
pub mod mock;
pub mod rewrite;

pub use error::QueryError;
pub use mock::MockSemanticSearch;
pub use rewrite::{
    join_query, render_id_filter, rewrite_query, split_query, ParsedQuery, QueryRewriter,
    RewriterConfig, SemanticSearch, MATCH_NOTHING_ID,
};
