//! Vector index trait and types.
//!
//! Defines the interface for id-keyed vector storage and similarity search.

use vecsync_embeddings::Embedding;
use vecsync_types::{DistanceMetric, NoteId};

use crate::error::VectorError;

/// Result of a vector search
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// Record id
    pub note_id: NoteId,
    /// Distance under the index metric (lower = closer)
    pub distance: f32,
}

impl SearchResult {
    pub fn new(note_id: NoteId, distance: f32) -> Self {
        Self { note_id, distance }
    }
}

/// Index statistics
#[derive(Debug, Clone, Default)]
pub struct IndexStats {
    /// Number of vectors in the index
    pub vector_count: usize,
    /// Embedding dimension
    pub dimension: usize,
    /// Index file size in bytes
    pub size_bytes: u64,
}

/// Trait for vector indexes.
///
/// Implementations must be thread-safe for concurrent read access.
pub trait VectorIndex: Send + Sync {
    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Distance metric fixed at creation
    fn metric(&self) -> DistanceMetric;

    /// Get the number of vectors in the index
    fn len(&self) -> usize;

    /// Check if the index is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store `embedding` under `id`, replacing any previous vector for it.
    fn upsert(&mut self, id: NoteId, embedding: &Embedding) -> Result<(), VectorError>;

    /// Upsert many vectors. Every dimension is checked before anything is written.
    fn upsert_batch(&mut self, vectors: &[(NoteId, Embedding)]) -> Result<(), VectorError> {
        let expected = self.dimension();
        if let Some((_, bad)) = vectors.iter().find(|(_, e)| e.dimension() != expected) {
            return Err(VectorError::DimensionMismatch {
                expected,
                actual: bad.dimension(),
            });
        }
        for (id, emb) in vectors {
            self.upsert(*id, emb)?;
        }
        Ok(())
    }

    /// Search for k nearest neighbors.
    /// Returns at most `k` results ordered by increasing distance.
    fn search(&self, query: &Embedding, k: usize) -> Result<Vec<SearchResult>, VectorError>;

    /// Remove a vector by ID. Returns whether it was present.
    fn remove(&mut self, id: NoteId) -> Result<bool, VectorError>;

    /// Remove many vectors; absent ids are ignored. Returns how many were removed.
    fn delete_many(&mut self, ids: &[NoteId]) -> Result<usize, VectorError> {
        let mut removed = 0;
        for id in ids {
            if self.remove(*id)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Check if a vector ID exists
    fn contains(&self, id: NoteId) -> bool;

    /// Get index statistics
    fn stats(&self) -> IndexStats;

    /// Save index to disk
    fn save(&self) -> Result<(), VectorError>;

    /// Clear all vectors from the index
    fn clear(&mut self) -> Result<(), VectorError>;
}
