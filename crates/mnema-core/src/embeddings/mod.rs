//! Embedding profile and provider seam
//!
//! The engine treats the embedding backend as an opaque function
//! `text -> vector of known dimension`. Identity is the
//! (provider, model, dim) triple; its slug names the store file so two
//! profiles never share vectors.

#[cfg(feature = "local-embeddings")]
mod local;

#[cfg(feature = "local-embeddings")]
pub use local::{LocalEmbedder, LOCAL_EMBEDDING_DIM, LOCAL_EMBEDDING_MODEL};

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Longest input accepted by providers; longer text is truncated
/// deterministically, never rejected.
pub const MAX_TEXT_LENGTH: usize = 8192;

// ============================================================================
// ERRORS
// ============================================================================

/// Embedding failures surfaced to the write and search paths
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbeddingError {
    /// Provider not responding; retryable with a caller-side timeout
    #[error("Embedding provider unavailable: {0}")]
    Unavailable(String),
    /// Stored dimension conflicts with the active profile
    #[error("Embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    /// Provider returned an error for this input
    #[error("Embedding failed: {0}")]
    Failed(String),
}

// ============================================================================
// PROFILE
// ============================================================================

/// Identity of the embedding space the store is built on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingProfile {
    pub provider: String,
    pub model: String,
    pub dim: usize,
}

impl EmbeddingProfile {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, dim: usize) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            dim,
        }
    }

    /// Stable slug for the profile, used as the store-file suffix.
    ///
    /// FNV-1a over `provider:model:dim`; hex-encoded. Stable across
    /// processes and platforms.
    pub fn slug(&self) -> String {
        const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
        let identity = format!("{}:{}:{}", self.provider, self.model, self.dim);
        let mut hash = FNV_OFFSET;
        for byte in identity.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        format!("{hash:016x}")
    }
}

// ============================================================================
// PROVIDER TRAIT
// ============================================================================

/// The opaque embedding backend
///
/// Documents and queries may use different normalizations or prefixes
/// but must share the profile dimension.
pub trait EmbeddingProvider: Send + Sync {
    fn profile(&self) -> EmbeddingProfile;

    /// Embed stored content. Must return exactly `profile().dim` floats.
    fn embed_document(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed a search query. Must return exactly `profile().dim` floats.
    fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Whether the backend can serve requests right now
    fn is_ready(&self) -> bool {
        true
    }

    /// Block until ready or until `timeout` elapses; returns readiness.
    ///
    /// Write paths and fresh-embedding searches wait here; retrieval
    /// falls back to trigger/lexical paths when this returns false.
    fn await_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_ready() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        true
    }
}

// ============================================================================
// VECTOR HELPERS
// ============================================================================

/// Cosine similarity of two equal-length vectors; 0.0 when either is zero
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Truncate text to [`MAX_TEXT_LENGTH`] on a char boundary
pub fn truncate_input(text: &str) -> &str {
    if text.len() <= MAX_TEXT_LENGTH {
        return text;
    }
    let mut end = MAX_TEXT_LENGTH;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

// ============================================================================
// TESTS
// ============================================================================
