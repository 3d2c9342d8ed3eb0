//! Local embedding backend
//!
//! fastembed ONNX inference, fully offline after the first model
//! download. Model files cache under `MNEMA_FASTEMBED_CACHE` or the
//! platform cache directory.

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use super::{truncate_input, EmbeddingError, EmbeddingProfile, EmbeddingProvider};

/// Dimension of the local model's vectors
pub const LOCAL_EMBEDDING_DIM: usize = 768;

/// Model identifier recorded in the profile
pub const LOCAL_EMBEDDING_MODEL: &str = "nomic-ai/nomic-embed-text-v1.5";

static MODEL: OnceLock<Result<Mutex<TextEmbedding>, String>> = OnceLock::new();

fn cache_dir() -> PathBuf {
    if let Ok(path) = std::env::var("MNEMA_FASTEMBED_CACHE") {
        return PathBuf::from(path);
    }
    if let Some(proj_dirs) = directories::ProjectDirs::from("dev", "mnema", "mnema") {
        return proj_dirs.cache_dir().join("fastembed");
    }
    PathBuf::from(".fastembed_cache")
}

fn model() -> Result<std::sync::MutexGuard<'static, TextEmbedding>, EmbeddingError> {
    let result = MODEL.get_or_init(|| {
        let cache = cache_dir();
        if let Err(e) = std::fs::create_dir_all(&cache) {
            tracing::warn!("failed to create fastembed cache dir {:?}: {}", cache, e);
        }

        let options = InitOptions::new(EmbeddingModel::NomicEmbedTextV15)
            .with_show_download_progress(false)
            .with_cache_dir(cache);

        TextEmbedding::try_new(options)
            .map(Mutex::new)
            .map_err(|e| format!("failed to initialize {LOCAL_EMBEDDING_MODEL}: {e}"))
    });

    match result {
        Ok(model) => model
            .lock()
            .map_err(|e| EmbeddingError::Unavailable(format!("model lock poisoned: {e}"))),
        Err(err) => Err(EmbeddingError::Unavailable(err.clone())),
    }
}

/// Local fastembed-backed provider
///
/// The nomic model distinguishes document and query inputs by prefix;
/// both share [`LOCAL_EMBEDDING_DIM`].
#[derive(Debug, Default)]
pub struct LocalEmbedder;

impl LocalEmbedder {
    pub fn new() -> Self {
        Self
    }

    fn embed_with_prefix(&self, prefix: &str, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let input = format!("{prefix}{}", truncate_input(text));
        let mut model = model()?;
        let mut vectors = model
            .embed(vec![input], None)
            .map_err(|e| EmbeddingError::Failed(e.to_string()))?;
        let vector = vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Failed("model returned no vector".to_string()))?;
        if vector.len() != LOCAL_EMBEDDING_DIM {
            return Err(EmbeddingError::DimensionMismatch {
                expected: LOCAL_EMBEDDING_DIM,
                got: vector.len(),
            });
        }
        Ok(vector)
    }
}

impl EmbeddingProvider for LocalEmbedder {
    fn profile(&self) -> EmbeddingProfile {
        EmbeddingProfile::new("fastembed", LOCAL_EMBEDDING_MODEL, LOCAL_EMBEDDING_DIM)
    }

    fn embed_document(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_with_prefix("search_document: ", text)
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_with_prefix("search_query: ", text)
    }

    fn is_ready(&self) -> bool {
        MODEL.get().map(|r| r.is_ok()).unwrap_or(false) || model().is_ok()
    }
}
