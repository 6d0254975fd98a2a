//! Embedding provider trait and types.
//!
//! Defines the interface for generating vector embeddings from text.

use async_trait::async_trait;

use crate::error::EmbeddingError;

/// Vector embedding - a fixed-length float array.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    /// The embedding vector
    pub values: Vec<f32>,
}

impl Embedding {
    /// Create an embedding from the values a provider returned.
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Create an embedding normalized to unit length.
    pub fn normalized(values: Vec<f32>) -> Self {
        let norm: f32 = values.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            values.iter().map(|x| x / norm).collect()
        } else {
            values
        };
        Self { values }
    }

    /// Get the embedding dimension
    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Compute cosine similarity with another embedding.
    /// Returns value in [-1, 1] range (1 = identical direction).
    pub fn cosine_similarity(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return 0.0;
        }
        let dot: f32 = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a * b)
            .sum();
        let norm_a: f32 = self.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = other.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }
        dot / (norm_a * norm_b)
    }
}

/// Whether text is being embedded for storage or for lookup.
///
/// Asymmetric models produce different vectors for the two framings, and
/// using the wrong one degrades retrieval silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmbeddingRole {
    /// Indexing-time text
    Document,
    /// Search-time text
    Query,
}

impl std::fmt::Display for EmbeddingRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbeddingRole::Document => write!(f, "document"),
            EmbeddingRole::Query => write!(f, "query"),
        }
    }
}

/// Role markers prepended to text before it reaches the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolePrefixes {
    pub document: String,
    pub query: String,
}

impl Default for RolePrefixes {
    fn default() -> Self {
        Self {
            document: "search_document: ".to_string(),
            query: "search_query: ".to_string(),
        }
    }
}

impl RolePrefixes {
    pub fn new(document: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            query: query.into(),
        }
    }

    /// Marker for the given role.
    pub fn prefix(&self, role: EmbeddingRole) -> &str {
        match role {
            EmbeddingRole::Document => &self.document,
            EmbeddingRole::Query => &self.query,
        }
    }

    /// Prepend the role marker to `text`.
    pub fn apply(&self, role: EmbeddingRole, text: &str) -> String {
        format!("{}{}", self.prefix(role), text)
    }
}

/// Model information
#[derive(Debug, Clone)]
pub struct ModelInfo {
    /// Model name (e.g., "nomic-embed-text")
    pub name: String,
    /// Embedding dimension
    pub dimension: usize,
}

/// Trait for embedding providers.
///
/// Implementations must be thread-safe (Send + Sync) for concurrent use.
/// A call either returns one vector per input, in input order, or fails as
/// a whole.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Get model information
    fn info(&self) -> &ModelInfo;

    /// Embed `texts` under `role` in a single round trip.
    async fn embed(
        &self,
        texts: &[String],
        role: EmbeddingRole,
    ) -> Result<Vec<Embedding>, EmbeddingError>;

    /// Embed one text.
    async fn embed_one(&self, text: &str, role: EmbeddingRole) -> Result<Embedding, EmbeddingError> {
        let mut embeddings = self.embed(&[text.to_string()], role).await?;
        if embeddings.len() != 1 {
            return Err(EmbeddingError::CountMismatch {
                expected: 1,
                actual: embeddings.len(),
            });
        }
        Ok(embeddings.remove(0))
    }
}
