//! # Mnema Core
//!
//! Cognitive memory engine for AI coding assistants. Indexes, stores,
//! searches, and ranks development-session memory files:
//!
//! - **Prediction-error gate**: similarity bands decide whether a save
//!   creates, reinforces, updates, links, or supersedes existing
//!   memories, so the store never grows unboundedly
//! - **FSRS scheduling**: per-memory stability/difficulty with
//!   exponential retrievability and testing-effect strengthening on
//!   every retrieval
//! - **Hybrid retrieval**: HNSW vector search (usearch) + FTS5 fused
//!   with Reciprocal Rank Fusion, multi-concept intersection search,
//!   and whole-phrase trigger matching
//! - **Working memory**: per-session attention with turn decay,
//!   co-activation spread, and HOT/WARM/COLD projection
//! - **Session learning**: preflight/postflight epistemic deltas and a
//!   weighted learning index
//! - **Causal graph**: six typed relations with bounded BFS traversal
//! - **Checkpoints**: named logical snapshots with scoped restore
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mnema_core::{Indexer, IndexOptions, LocalEmbedder, SearchOptions, Storage};
//!
//! let storage = Arc::new(Storage::open(None, Arc::new(LocalEmbedder::new()))?);
//! let indexer = Indexer::new(Arc::clone(&storage), std::env::current_dir()?);
//!
//! indexer.index_memory_file("specs/007-auth/memory/oauth.md".as_ref(), IndexOptions::default())?;
//! let hits = storage.search_memories("how does authentication work?", &SearchOptions::default())?;
//! ```

// ============================================================================
// MODULES
// ============================================================================

pub mod attention;
pub mod causal;
pub mod checkpoint;
pub mod embeddings;
pub mod fsrs;
pub mod gate;
pub mod indexer;
pub mod learning;
pub mod memory;
pub mod parser;
pub mod search;
pub mod storage;

#[cfg(any(test, feature = "test-util"))]
#[doc(hidden)]
pub mod testing;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use memory::{
    ContextType, EmbeddingStatus, ImportanceTier, MemoryRecord, MemoryStats, MemoryUpdate,
    NewMemory,
};

pub use embeddings::{
    cosine_similarity, EmbeddingError, EmbeddingProfile, EmbeddingProvider, MAX_TEXT_LENGTH,
};

#[cfg(feature = "local-embeddings")]
pub use embeddings::{LocalEmbedder, LOCAL_EMBEDDING_DIM, LOCAL_EMBEDDING_MODEL};

pub use fsrs::{retrievability, FsrsState, Grade, ReviewOutcome};

pub use gate::{ContradictionSpan, GateCandidate, GateDecision, PeAction};

pub use parser::{parse_memory_file, Anchor, ParseOutcome, ParsedMemory};

pub use indexer::{
    FileOutcome, IndexOptions, IndexResult, IndexStatus, Indexer, SaveRequest, ScanOptions,
    ScanReport,
};

pub use search::{RetrievalConfig, SearchHit, SearchOptions, TriggerMatch};

pub use storage::{IntegrityReport, Result, Storage, StorageError};

pub use attention::{AttentionTier, MemoryProjection, TurnOutcome, WorkingMemoryEntry};

pub use causal::{CausalChain, CausalEdge, ChainOptions, Direction, GraphStats, Relation};

pub use checkpoint::{CheckpointInfo, RestoreReport};

pub use learning::{
    interpret_learning_index, EpistemicScores, HistoryFilter, LearningPhase, LearningRecord,
    LearningSummary,
};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        ContextType, EmbeddingProfile, EmbeddingProvider, Grade, ImportanceTier, IndexOptions,
        Indexer, MemoryRecord, Result, SearchOptions, Storage, StorageError,
    };
}
