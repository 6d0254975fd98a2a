//! HNSW index implementation using usearch.
//!
//! Record ids are the usearch keys. The index is opened with `multi = false`,
//! so an upsert removes the old vector for an id before adding the new one.

use std::path::PathBuf;

use tracing::{debug, info, warn};
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};
use vecsync_embeddings::Embedding;
use vecsync_types::{DistanceMetric, NoteId};

use crate::error::VectorError;
use crate::index::{IndexStats, SearchResult, VectorIndex};

const INDEX_FILE: &str = "hnsw.usearch";

/// HNSW index configuration
#[derive(Debug, Clone)]
pub struct HnswConfig {
    /// Embedding dimension (must match model)
    pub dimension: usize,
    /// Distance metric, fixed once the index exists
    pub metric: DistanceMetric,
    /// Number of connections per layer (M parameter)
    pub connectivity: usize,
    /// Build-time search depth (ef_construction)
    pub expansion_add: usize,
    /// Query-time search depth (ef_search)
    pub expansion_search: usize,
    /// Index directory
    pub index_path: PathBuf,
    /// Initial capacity; grows by doubling
    pub capacity: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            dimension: 768, // nomic-embed-text
            metric: DistanceMetric::Cos,
            connectivity: 16,
            expansion_add: 128,
            expansion_search: 64,
            index_path: PathBuf::from("./vector-index"),
            capacity: 1024,
        }
    }
}

impl HnswConfig {
    pub fn new(dimension: usize, index_path: impl Into<PathBuf>) -> Self {
        Self {
            dimension,
            index_path: index_path.into(),
            ..Default::default()
        }
    }

    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    fn options(&self) -> IndexOptions {
        IndexOptions {
            dimensions: self.dimension,
            metric: match self.metric {
                DistanceMetric::Cos => MetricKind::Cos,
                DistanceMetric::L2 => MetricKind::L2sq,
            },
            quantization: ScalarKind::F32,
            connectivity: self.connectivity,
            expansion_add: self.expansion_add,
            expansion_search: self.expansion_search,
            multi: false,
        }
    }

    fn build(&self) -> Result<Index, VectorError> {
        let index = Index::new(&self.options()).map_err(|e| VectorError::Index(e.to_string()))?;
        index
            .reserve(self.capacity.max(1))
            .map_err(|e| VectorError::Index(e.to_string()))?;
        Ok(index)
    }
}

/// HNSW index wrapper around usearch.
pub struct HnswIndex {
    index: Index,
    config: HnswConfig,
}

impl HnswIndex {
    /// Open the index saved under `config.index_path`, or create an empty one.
    ///
    /// A saved index whose dimension differs from `config.dimension` is an
    /// error; callers that intend to rebuild use [`HnswIndex::create_fresh`].
    pub fn open_or_create(config: HnswConfig) -> Result<Self, VectorError> {
        let index_file = config.index_path.join(INDEX_FILE);

        let index = if index_file.exists() {
            info!(path = ?index_file, "Opening existing vector index");
            let idx = Index::new(&config.options()).map_err(|e| VectorError::Index(e.to_string()))?;
            idx.load(path_str(&index_file)?)
                .map_err(|e| VectorError::Index(format!("Failed to load: {}", e)))?;
            if idx.dimensions() != config.dimension {
                return Err(VectorError::DimensionMismatch {
                    expected: config.dimension,
                    actual: idx.dimensions(),
                });
            }
            idx
        } else {
            info!(path = ?index_file, dim = config.dimension, metric = %config.metric, "Creating new vector index");
            std::fs::create_dir_all(&config.index_path)?;
            config.build()?
        };

        Ok(Self { index, config })
    }

    /// Discard any saved index and start empty with `config`.
    pub fn create_fresh(config: HnswConfig) -> Result<Self, VectorError> {
        let index_file = config.index_path.join(INDEX_FILE);
        if index_file.exists() {
            warn!(path = ?index_file, "Discarding existing vector index");
            std::fs::remove_file(&index_file)?;
        }
        std::fs::create_dir_all(&config.index_path)?;
        let index = config.build()?;
        Ok(Self { index, config })
    }

    /// Get the index file path
    pub fn index_file(&self) -> PathBuf {
        self.config.index_path.join(INDEX_FILE)
    }

    fn check_dimension(&self, embedding: &Embedding) -> Result<(), VectorError> {
        if embedding.dimension() != self.config.dimension {
            return Err(VectorError::DimensionMismatch {
                expected: self.config.dimension,
                actual: embedding.dimension(),
            });
        }
        Ok(())
    }

    fn ensure_capacity(&self) -> Result<(), VectorError> {
        let size = self.index.size();
        if size + 1 > self.index.capacity() {
            let target = (size + 1).max(self.index.capacity() * 2);
            debug!(from = self.index.capacity(), to = target, "Growing vector index");
            self.index
                .reserve(target)
                .map_err(|e| VectorError::Index(e.to_string()))?;
        }
        Ok(())
    }
}

fn path_str(path: &std::path::Path) -> Result<&str, VectorError> {
    path.to_str()
        .ok_or_else(|| VectorError::Index("Invalid path encoding".to_string()))
}

impl VectorIndex for HnswIndex {
    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn metric(&self) -> DistanceMetric {
        self.config.metric
    }

    fn len(&self) -> usize {
        self.index.size()
    }

    fn upsert(&mut self, id: NoteId, embedding: &Embedding) -> Result<(), VectorError> {
        self.check_dimension(embedding)?;

        if self.index.contains(id) {
            self.index
                .remove(id)
                .map_err(|e| VectorError::Index(e.to_string()))?;
        }
        self.ensure_capacity()?;
        self.index
            .add(id, &embedding.values)
            .map_err(|e| VectorError::Index(e.to_string()))?;

        debug!(id = id, "Upserted vector");
        Ok(())
    }

    fn search(&self, query: &Embedding, k: usize) -> Result<Vec<SearchResult>, VectorError> {
        self.check_dimension(query)?;
        if k == 0 || self.index.size() == 0 {
            return Ok(Vec::new());
        }

        let results = self
            .index
            .search(&query.values, k)
            .map_err(|e| VectorError::Index(e.to_string()))?;

        let mut search_results: Vec<SearchResult> = results
            .keys
            .iter()
            .zip(results.distances.iter())
            .map(|(&id, &dist)| SearchResult::new(id, dist))
            .collect();
        search_results.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        search_results.truncate(k);

        debug!(k = k, found = search_results.len(), "Search complete");
        Ok(search_results)
    }

    fn remove(&mut self, id: NoteId) -> Result<bool, VectorError> {
        let removed = self
            .index
            .remove(id)
            .map_err(|e| VectorError::Index(e.to_string()))?;

        if removed > 0 {
            debug!(id = id, "Removed vector");
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn contains(&self, id: NoteId) -> bool {
        self.index.contains(id)
    }

    fn stats(&self) -> IndexStats {
        let size_bytes = std::fs::metadata(self.index_file())
            .map(|m| m.len())
            .unwrap_or(0);

        IndexStats {
            vector_count: self.index.size(),
            dimension: self.config.dimension,
            size_bytes,
        }
    }

    fn save(&self) -> Result<(), VectorError> {
        let path = self.index_file();
        std::fs::create_dir_all(&self.config.index_path)?;
        self.index
            .save(path_str(&path)?)
            .map_err(|e| VectorError::Index(format!("Failed to save: {}", e)))?;

        info!(path = ?path, vectors = self.index.size(), "Saved vector index");
        Ok(())
    }

    fn clear(&mut self) -> Result<(), VectorError> {
        self.index = self.config.build()?;
        info!("Cleared vector index");
        Ok(())
    }
}
