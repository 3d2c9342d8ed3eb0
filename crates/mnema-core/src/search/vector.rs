//! HNSW vector index
//!
//! In-memory usearch index over the stored embeddings, keyed directly
//! by memory id. Durable vectors live in the `memory_vectors` table;
//! this index is rebuilt from them at open and kept in sync on write.

use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

/// HNSW connectivity (higher = better recall, more memory)
const DEFAULT_CONNECTIVITY: usize = 16;

/// Expansion factor while building
const DEFAULT_EXPANSION_ADD: usize = 128;

/// Expansion factor while searching
const DEFAULT_EXPANSION_SEARCH: usize = 64;

/// Minimum capacity reserved when the index grows
const MIN_RESERVE: usize = 16;

// ============================================================================
// ERRORS
// ============================================================================

/// Vector index failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum VectorSearchError {
    #[error("index creation failed: {0}")]
    IndexCreation(String),
    #[error("failed to add vector: {0}")]
    IndexAdd(String),
    #[error("search failed: {0}")]
    IndexSearch(String),
    #[error("invalid dimensions: expected {expected}, got {got}")]
    InvalidDimensions { expected: usize, got: usize },
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the vector index
#[derive(Debug, Clone)]
pub struct VectorIndexConfig {
    pub dimensions: usize,
    pub connectivity: usize,
    pub expansion_add: usize,
    pub expansion_search: usize,
}

impl VectorIndexConfig {
    pub fn for_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions,
            connectivity: DEFAULT_CONNECTIVITY,
            expansion_add: DEFAULT_EXPANSION_ADD,
            expansion_search: DEFAULT_EXPANSION_SEARCH,
        }
    }
}

/// Index statistics
#[derive(Debug, Clone)]
pub struct VectorIndexStats {
    pub total_vectors: usize,
    pub dimensions: usize,
}

// ============================================================================
// INDEX
// ============================================================================

/// Cosine-metric HNSW index keyed by memory id
pub struct VectorIndex {
    index: Index,
    config: VectorIndexConfig,
}

impl VectorIndex {
    pub fn new(dimensions: usize) -> Result<Self, VectorSearchError> {
        Self::with_config(VectorIndexConfig::for_dimensions(dimensions))
    }

    pub fn with_config(config: VectorIndexConfig) -> Result<Self, VectorSearchError> {
        let options = IndexOptions {
            dimensions: config.dimensions,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F32,
            connectivity: config.connectivity,
            expansion_add: config.expansion_add,
            expansion_search: config.expansion_search,
            multi: false,
        };

        let index =
            Index::new(&options).map_err(|e| VectorSearchError::IndexCreation(e.to_string()))?;

        Ok(Self { index, config })
    }

    pub fn len(&self) -> usize {
        self.index.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    pub fn stats(&self) -> VectorIndexStats {
        VectorIndexStats {
            total_vectors: self.len(),
            dimensions: self.config.dimensions,
        }
    }

    /// usearch requires reserve() before add() or it may fault
    fn ensure_capacity(&mut self) -> Result<(), VectorSearchError> {
        let capacity = self.index.capacity();
        if self.index.size() >= capacity {
            let target = (capacity * 2).max(MIN_RESERVE);
            self.index
                .reserve(target)
                .map_err(|e| VectorSearchError::IndexCreation(format!("reserve failed: {e}")))?;
        }
        Ok(())
    }

    /// Insert or replace the vector for `memory_id`
    pub fn add(&mut self, memory_id: i64, vector: &[f32]) -> Result<(), VectorSearchError> {
        if vector.len() != self.config.dimensions {
            return Err(VectorSearchError::InvalidDimensions {
                expected: self.config.dimensions,
                got: vector.len(),
            });
        }
        let key = memory_id as u64;
        if self.index.contains(key) {
            let _ = self.index.remove(key);
        }
        self.ensure_capacity()?;
        self.index
            .add(key, vector)
            .map_err(|e| VectorSearchError::IndexAdd(e.to_string()))
    }

    /// Remove the vector for `memory_id`; false when absent
    pub fn remove(&mut self, memory_id: i64) -> bool {
        self.index.remove(memory_id as u64).map(|n| n > 0).unwrap_or(false)
    }

    pub fn contains(&self, memory_id: i64) -> bool {
        self.index.contains(memory_id as u64)
    }

    /// Nearest neighbors as `(memory_id, cosine_similarity)`, best first
    pub fn search(&self, vector: &[f32], k: usize) -> Result<Vec<(i64, f32)>, VectorSearchError> {
        if vector.len() != self.config.dimensions {
            return Err(VectorSearchError::InvalidDimensions {
                expected: self.config.dimensions,
                got: vector.len(),
            });
        }
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let matches = self
            .index
            .search(vector, k)
            .map_err(|e| VectorSearchError::IndexSearch(e.to_string()))?;
        Ok(matches
            .keys
            .iter()
            .zip(matches.distances.iter())
            .map(|(key, distance)| (*key as i64, 1.0 - distance))
            .collect())
    }

    /// Drop everything; used when reconciling against an external write
    pub fn clear(&mut self) -> Result<(), VectorSearchError> {
        self.index
            .reset()
            .map_err(|e| VectorSearchError::IndexCreation(format!("reset failed: {e}")))?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
