//! Deterministic test fixtures
//!
//! Shared by the crate's unit tests and the workspace e2e suite
//! (behind the `test-util` feature) so no test ever needs a model
//! download.

use std::sync::Arc;

use tempfile::TempDir;

use crate::embeddings::{EmbeddingError, EmbeddingProfile, EmbeddingProvider};
use crate::storage::Storage;

/// Deterministic bag-of-words embedder
///
/// Tokens hash into dimension buckets; vectors are L2-normalized, so
/// token overlap maps directly onto cosine similarity. Identical token
/// sets embed identically, which makes duplicate-band assertions
/// exact.
#[derive(Debug, Clone)]
pub struct StubEmbedder {
    dim: usize,
}

impl StubEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        let mut any = false;
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            any = true;
            let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
            for byte in token.as_bytes() {
                hash ^= u64::from(*byte);
                hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
            }
            vector[(hash % self.dim as u64) as usize] += 1.0;
        }
        if !any {
            vector[0] = 1.0;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        for value in &mut vector {
            *value /= norm;
        }
        vector
    }
}

impl EmbeddingProvider for StubEmbedder {
    fn profile(&self) -> EmbeddingProfile {
        EmbeddingProfile::new("stub", "bag-of-words", self.dim)
    }

    fn embed_document(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed(text))
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed(text))
    }
}

/// A provider that reports not-ready, for fallback-path tests
#[derive(Debug, Clone)]
pub struct OfflineEmbedder {
    inner: StubEmbedder,
}

impl OfflineEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            inner: StubEmbedder::new(dim),
        }
    }
}

impl EmbeddingProvider for OfflineEmbedder {
    fn profile(&self) -> EmbeddingProfile {
        self.inner.profile()
    }

    fn embed_document(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Unavailable("offline".to_string()))
    }

    fn embed_query(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Unavailable("offline".to_string()))
    }

    fn is_ready(&self) -> bool {
        false
    }

    fn await_ready(&self, _timeout: std::time::Duration) -> bool {
        // Never comes up; returning immediately keeps tests fast
        false
    }
}

/// Default test embedding dimension
pub const STUB_DIM: usize = 64;

/// A fresh store on a stub embedder in a temp directory
pub fn stub_storage() -> (Storage, TempDir) {
    let dir = TempDir::new().expect("failed to create temp directory");
    let provider = Arc::new(StubEmbedder::new(STUB_DIM));
    let storage = Storage::open(Some(dir.path().join("test.sqlite")), provider)
        .expect("failed to open test storage");
    (storage, dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::cosine_similarity;

    #[test]
    fn identical_text_embeds_identically() {
        let embedder = StubEmbedder::new(32);
        let a = embedder.embed_document("We use OAuth 2 with JWT tokens").unwrap();
        let b = embedder.embed_document("we use oauth 2 with jwt tokens!").unwrap();
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn disjoint_text_is_dissimilar() {
        let embedder = StubEmbedder::new(64);
        let a = embedder.embed_document("oauth jwt tokens rotation").unwrap();
        let b = embedder.embed_document("kubernetes ingress annotations").unwrap();
        assert!(cosine_similarity(&a, &b) < 0.5);
    }

    #[test]
    fn vectors_are_normalized() {
        let embedder = StubEmbedder::new(16);
        let v = embedder.embed_document("some words here").unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_text_is_stable() {
        let embedder = StubEmbedder::new(8);
        let a = embedder.embed_document("").unwrap();
        let b = embedder.embed_document("   ").unwrap();
        assert_eq!(a, b);
    }
}
