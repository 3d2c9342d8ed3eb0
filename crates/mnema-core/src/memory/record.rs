//! Memory record types
//!
//! A record combines file identity (path, content hash), retrieval
//! metadata (triggers, tier, context type), the stored embedding state,
//! and FSRS scheduling fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound on trigger phrases kept per memory
pub const MAX_TRIGGER_PHRASES: usize = 10;

/// Upper bound on a single trigger phrase, in characters
pub const MAX_TRIGGER_LEN: usize = 80;

// ============================================================================
// ENUMS
// ============================================================================

/// What kind of session produced the memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContextType {
    Research,
    Implementation,
    Decision,
    Discovery,
    #[default]
    General,
}

impl ContextType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextType::Research => "research",
            ContextType::Implementation => "implementation",
            ContextType::Decision => "decision",
            ContextType::Discovery => "discovery",
            ContextType::General => "general",
        }
    }

    /// Parse from the stored/wire string. Unknown values are rejected so
    /// the dispatcher can map them to `INVALID_PARAMETER`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "research" => Some(ContextType::Research),
            "implementation" => Some(ContextType::Implementation),
            "decision" => Some(ContextType::Decision),
            "discovery" => Some(ContextType::Discovery),
            "general" => Some(ContextType::General),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContextType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Importance tier - drives retrieval weighting and lifecycle
///
/// `Constitutional` memories never expire and are always
/// surface-eligible. `Deprecated` memories are excluded from
/// prediction-error neighbor searches but stay retrievable with
/// reduced weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImportanceTier {
    Constitutional,
    Critical,
    Important,
    #[default]
    Normal,
    Temporary,
    Deprecated,
}

impl ImportanceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportanceTier::Constitutional => "constitutional",
            ImportanceTier::Critical => "critical",
            ImportanceTier::Important => "important",
            ImportanceTier::Normal => "normal",
            ImportanceTier::Temporary => "temporary",
            ImportanceTier::Deprecated => "deprecated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "constitutional" => Some(ImportanceTier::Constitutional),
            "critical" => Some(ImportanceTier::Critical),
            "important" => Some(ImportanceTier::Important),
            "normal" => Some(ImportanceTier::Normal),
            "temporary" => Some(ImportanceTier::Temporary),
            "deprecated" => Some(ImportanceTier::Deprecated),
            _ => None,
        }
    }

    /// Multiplier applied to similarity when ranking search results
    pub fn weight(&self) -> f64 {
        match self {
            ImportanceTier::Constitutional => 1.0,
            ImportanceTier::Critical => 0.9,
            ImportanceTier::Important => 0.7,
            ImportanceTier::Normal => 0.5,
            ImportanceTier::Temporary => 0.3,
            ImportanceTier::Deprecated => 0.1,
        }
    }
}

impl std::fmt::Display for ImportanceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether a memory row has a usable vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingStatus {
    Success,
    #[default]
    Pending,
    Failed,
}

impl EmbeddingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingStatus::Success => "success",
            EmbeddingStatus::Pending => "pending",
            EmbeddingStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(EmbeddingStatus::Success),
            "pending" => Some(EmbeddingStatus::Pending),
            "failed" => Some(EmbeddingStatus::Failed),
            _ => None,
        }
    }
}

// ============================================================================
// MEMORY RECORD
// ============================================================================

/// A memory row as stored in `memory_index`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    /// Store-assigned id, monotonically increasing
    pub id: i64,
    pub spec_folder: String,
    /// Unique path of the backing memory file
    pub file_path: String,
    pub title: String,
    /// Hex sha256 of the normalized file bytes
    pub content_hash: String,
    /// Full text cache; absent for rows indexed without content retention
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Normalized, deduplicated, at most [`MAX_TRIGGER_PHRASES`]
    pub trigger_phrases: Vec<String>,
    pub context_type: ContextType,
    pub importance_tier: ImportanceTier,
    /// Cached tier weight, kept in the row for ranking queries
    pub importance_weight: f64,
    pub embedding_status: EmbeddingStatus,
    /// mtime of the backing file at index time, nanoseconds
    pub file_mtime_ns: i64,

    // ========== FSRS state ==========
    /// Memory stability in days (>= 0.1)
    pub stability: f64,
    /// Inherent difficulty, 1.0 (easy) to 10.0 (hard)
    pub difficulty: f64,
    pub last_review: DateTime<Utc>,
    pub review_count: i64,

    // ========== Access tracking ==========
    pub access_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<DateTime<Utc>>,
    pub confidence: f64,
    pub validation_count: i64,

    /// Ids recorded by CREATE_LINKED gate decisions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_memories: Option<Vec<i64>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MemoryRecord {
    /// Days elapsed since the last review, clamped to >= 0
    pub fn elapsed_days(&self, now: DateTime<Utc>) -> f64 {
        let secs = (now - self.last_review).num_seconds() as f64;
        (secs / 86_400.0).max(0.0)
    }

    /// Age in days since creation, clamped to >= 0
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        let secs = (now - self.created_at).num_seconds() as f64;
        (secs / 86_400.0).max(0.0)
    }
}

// ============================================================================
// WRITE SHAPES
// ============================================================================

/// Fields required to create a new memory row
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub spec_folder: String,
    pub file_path: String,
    pub title: String,
    pub content: String,
    pub content_hash: String,
    pub trigger_phrases: Vec<String>,
    pub context_type: ContextType,
    pub importance_tier: ImportanceTier,
    pub file_mtime_ns: i64,
    pub related_memories: Option<Vec<i64>>,
}

/// Partial update applied to an existing row; `None` fields are untouched
#[derive(Debug, Clone, Default)]
pub struct MemoryUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub content_hash: Option<String>,
    pub trigger_phrases: Option<Vec<String>>,
    pub context_type: Option<ContextType>,
    pub importance_tier: Option<ImportanceTier>,
    pub file_mtime_ns: Option<i64>,
    pub confidence: Option<f64>,
    pub related_memories: Option<Vec<i64>>,
}

impl MemoryUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content.is_none()
            && self.content_hash.is_none()
            && self.trigger_phrases.is_none()
            && self.context_type.is_none()
            && self.importance_tier.is_none()
            && self.file_mtime_ns.is_none()
            && self.confidence.is_none()
            && self.related_memories.is_none()
    }
}

// ============================================================================
// STATS
// ============================================================================

/// Aggregate store statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub total_memories: i64,
    pub by_tier: Vec<(String, i64)>,
    pub by_context_type: Vec<(String, i64)>,
    pub by_folder: Vec<(String, i64)>,
    pub embedded: i64,
    pub pending_embeddings: i64,
    pub failed_embeddings: i64,
    pub avg_stability: f64,
    pub avg_difficulty: f64,
    pub total_accesses: i64,
}

// ============================================================================
// TESTS
// ============================================================================
