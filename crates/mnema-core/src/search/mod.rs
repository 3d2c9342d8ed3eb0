//! Retrieval primitives
//!
//! - HNSW vector index (usearch)
//! - FTS5 query sanitization
//! - Reciprocal Rank Fusion for hybrid results
//! - Trigger-phrase cache and matcher

mod hybrid;
mod trigger;
mod vector;

pub use hybrid::{reciprocal_rank_fusion, DEFAULT_RRF_K};
pub use trigger::{TriggerCache, TriggerMatch};
pub use vector::{VectorIndex, VectorIndexConfig, VectorIndexStats, VectorSearchError};

use serde::{Deserialize, Serialize};

use crate::memory::{ContextType, ImportanceTier, MemoryRecord};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Tunables shared by the retrieval paths
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Temporal decay constant in days; a memory `tau * ln 2` days old
    /// scores half. Default halves at 30 days.
    pub decay_tau_days: f64,
    /// RRF fusion constant
    pub rrf_k: f32,
    /// Per-concept floor for multi-concept search
    pub multi_concept_min_similarity: f32,
    /// Floor for prediction-error neighbor queries
    pub neighbor_min_similarity: f32,
    /// Constitutional rows prepended when pinning kicks in
    pub constitutional_pin_limit: usize,
    /// Window for the temporal-contiguity bonus
    pub contiguity_window_hours: f64,
    /// Peak score multiplier bonus inside the contiguity window
    pub contiguity_bonus: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            decay_tau_days: 30.0 / std::f64::consts::LN_2,
            rrf_k: DEFAULT_RRF_K,
            multi_concept_min_similarity: 0.5,
            neighbor_min_similarity: 0.5,
            constitutional_pin_limit: 5,
            contiguity_window_hours: 6.0,
            contiguity_bonus: 0.15,
        }
    }
}

/// Exponential age decay, `exp(-age / tau)`
pub fn decay_factor(age_days: f64, tau_days: f64) -> f64 {
    (-age_days.max(0.0) / tau_days.max(f64::EPSILON)).exp()
}

// ============================================================================
// SEARCH OPTIONS AND HITS
// ============================================================================

/// Options accepted by the retrieval entry points
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    pub spec_folder: Option<String>,
    pub tier: Option<ImportanceTier>,
    pub context_type: Option<ContextType>,
    /// Apply temporal decay to the composite score
    pub use_decay: bool,
    /// Boost memories created close in time to the top hit
    pub include_contiguity: bool,
    /// Prepend constitutional rows when none rank naturally
    pub include_constitutional: bool,
    /// Project only these anchor spans into returned content
    pub anchors: Vec<String>,
    /// Drop vector hits below this cosine similarity
    pub min_similarity: f32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            spec_folder: None,
            tier: None,
            context_type: None,
            use_decay: true,
            include_contiguity: false,
            include_constitutional: true,
            anchors: Vec::new(),
            min_similarity: 0.0,
        }
    }
}

/// One retrieval result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub memory: MemoryRecord,
    /// Cosine similarity when a vector path produced the hit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    /// Composite ranking score (similarity x tier weight x decay, or
    /// RRF score for hybrid results)
    pub score: f64,
    /// True when the row was pinned rather than ranked
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pinned: bool,
}

// ============================================================================
// FTS SANITIZATION
// ============================================================================

/// Make arbitrary user text safe for an FTS5 MATCH expression
///
/// Strips operators and quotes each term so `NEAR(...)`, `-`, `*`, and
/// unbalanced quotes cannot produce syntax errors or surprise
/// semantics.
pub fn sanitize_fts5_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| {
            let cleaned: String = term
                .chars()
                .filter(|c| c.is_alphanumeric() || *c == '_')
                .collect();
            cleaned
        })
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_operators() {
        assert_eq!(sanitize_fts5_query("jwt AND -tokens*"), "\"jwt\" \"AND\" \"tokens\"");
        assert_eq!(sanitize_fts5_query("NEAR(a b)"), "\"NEARa\" \"b\"");
        assert_eq!(sanitize_fts5_query("\"unbalanced"), "\"unbalanced\"");
        assert_eq!(sanitize_fts5_query("   "), "");
    }

    #[test]
    fn decay_halves_at_thirty_days() {
        let config = RetrievalConfig::default();
        let half = decay_factor(30.0, config.decay_tau_days);
        assert!((half - 0.5).abs() < 1e-9);
        assert_eq!(decay_factor(0.0, config.decay_tau_days), 1.0);
    }

    #[test]
    fn decay_clamps_negative_age() {
        assert_eq!(decay_factor(-5.0, 10.0), 1.0);
    }
}
