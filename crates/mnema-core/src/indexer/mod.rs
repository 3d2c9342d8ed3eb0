//! Indexer - the write path
//!
//! Serializes "file on disk" (or inline save) into a memory row, a
//! vector, and fresh caches, consistently with the prediction-error
//! gate's decision. Folder scans run incrementally with an mtime+hash
//! fast path and bounded concurrency.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use walkdir::WalkDir;

use crate::gate::{self, PeAction};
use crate::memory::{ContextType, ImportanceTier, MemoryUpdate, NewMemory};
use crate::parser::{self, ParsedMemory};
use crate::storage::{Result, Storage, StorageError};

/// Files indexed concurrently during a scan
pub const SCAN_BATCH_CONCURRENCY: usize = 8;

/// Neighbors fetched for the gate
const GATE_CANDIDATE_K: usize = 5;

/// How long a write waits for the embedding provider before giving up
const EMBED_READY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

// ============================================================================
// TYPES
// ============================================================================

/// Per-file indexing options
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexOptions {
    /// Re-index even when the content hash is unchanged
    pub force: bool,
    /// On embedding failure, store the row with a pending embedding
    /// instead of rolling back
    pub allow_partial_update: bool,
}

/// What the write path did with a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    Unchanged,
    Created,
    Updated,
    Reinforced,
    Superseded,
}

impl IndexStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexStatus::Unchanged => "unchanged",
            IndexStatus::Created => "created",
            IndexStatus::Updated => "updated",
            IndexStatus::Reinforced => "reinforced",
            IndexStatus::Superseded => "superseded",
        }
    }
}

/// Result of indexing one memory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexResult {
    pub status: IndexStatus,
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pe_action: Option<PeAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pe_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Inline save request (`memory_save` without a file on disk)
#[derive(Debug, Clone)]
pub struct SaveRequest {
    pub spec_folder: String,
    pub title: String,
    pub content: String,
    pub trigger_phrases: Vec<String>,
    pub context_type: ContextType,
    pub importance_tier: ImportanceTier,
    /// Derived from folder + title when absent
    pub file_path: Option<String>,
}

/// Scan options
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub spec_folder: Option<String>,
    pub force: bool,
    pub include_constitutional: bool,
    pub incremental: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            spec_folder: None,
            force: false,
            include_constitutional: true,
            incremental: true,
        }
    }
}

/// One file's outcome within a scan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOutcome {
    pub path: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Aggregate scan report
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub scanned: usize,
    pub created: usize,
    pub updated: usize,
    pub reinforced: usize,
    pub superseded: usize,
    pub unchanged: usize,
    /// Files whose mtime advanced without a content change
    pub touched: usize,
    pub failed: usize,
    pub files: Vec<FileOutcome>,
}

// ============================================================================
// INDEXER
// ============================================================================

/// Write-path orchestrator
pub struct Indexer {
    storage: Arc<Storage>,
    /// Root the allowed memory trees live under; row identity is the
    /// path relative to it
    base_dir: PathBuf,
}

impl Indexer {
    pub fn new(storage: Arc<Storage>, base_dir: PathBuf) -> Self {
        Self { storage, base_dir }
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn relative_identity<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.base_dir).unwrap_or(path)
    }

    /// Index one memory file from disk
    pub fn index_memory_file(&self, path: &Path, opts: IndexOptions) -> Result<IndexResult> {
        let identity = self.relative_identity(path);
        if !parser::is_allowed_root(identity) {
            return Err(StorageError::InvalidInput(format!(
                "{} is outside the allowed memory roots",
                identity.display()
            )));
        }

        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        };
        let raw = std::fs::read_to_string(&absolute)?;
        let mtime_ns = file_mtime_ns(&absolute);

        let outcome = parser::parse_memory_file(identity, &raw);
        let parsed = match outcome.parsed {
            Some(parsed) if outcome.valid => parsed,
            _ => {
                return Err(StorageError::Parse(outcome.errors.join("; ")));
            }
        };

        let mut result = self.index_parsed(parsed, mtime_ns, opts)?;
        result.warnings.extend(outcome.warnings);
        Ok(result)
    }

    /// Index an inline save through the same gate-driven pipeline
    pub fn save_memory(&self, request: SaveRequest, opts: IndexOptions) -> Result<IndexResult> {
        if request.title.trim().is_empty() {
            return Err(StorageError::InvalidInput("title cannot be empty".to_string()));
        }
        if request.content.trim().is_empty() {
            return Err(StorageError::InvalidInput("content cannot be empty".to_string()));
        }
        let file_path = request
            .file_path
            .unwrap_or_else(|| format!("{}/memory/{}.md", request.spec_folder, slugify(&request.title)));

        let parsed = ParsedMemory {
            spec_folder: request.spec_folder,
            file_path,
            title: request.title,
            content_hash: parser::content_hash(&request.content),
            anchors: parser::extract_anchors(&request.content),
            content: request.content,
            trigger_phrases: parser::normalize_triggers(&request.trigger_phrases),
            context_type: request.context_type,
            importance_tier: request.importance_tier,
        };
        self.index_parsed(parsed, 0, opts)
    }

    /// The gate-driven write pipeline shared by file and inline saves
    fn index_parsed(
        &self,
        parsed: ParsedMemory,
        file_mtime_ns: i64,
        opts: IndexOptions,
    ) -> Result<IndexResult> {
        let mut warnings = Vec::new();
        let existing = self.storage.get_memory_by_path(&parsed.file_path)?;

        // Hash fast path: unchanged content is a no-op
        if let Some(existing) = &existing {
            if existing.content_hash == parsed.content_hash && !opts.force {
                if existing.file_mtime_ns != file_mtime_ns && file_mtime_ns != 0 {
                    self.storage.touch_mtimes(&[(existing.id, file_mtime_ns)])?;
                }
                return Ok(IndexResult {
                    status: IndexStatus::Unchanged,
                    id: existing.id,
                    pe_action: None,
                    pe_reason: None,
                    similarity: None,
                    superseded_id: None,
                    warnings,
                });
            }
        }

        // Embed, waiting up to the readiness timeout. A failure either
        // rolls the write back or stores the row pending, per
        // allow_partial_update.
        let provider = self.storage.provider();
        let embed_result = if provider.await_ready(EMBED_READY_TIMEOUT) {
            provider.embed_document(&parsed.content)
        } else {
            Err(crate::embeddings::EmbeddingError::Unavailable(
                "provider not ready within the write timeout".to_string(),
            ))
        };
        let embedding = match embed_result {
            Ok(vector) => Some(vector),
            Err(e) if opts.allow_partial_update => {
                tracing::warn!(path = %parsed.file_path, "embedding failed, storing pending: {e}");
                warnings.push(format!("embedding failed, stored pending: {e}"));
                None
            }
            Err(e) => return Err(StorageError::Embedding(e)),
        };

        let decision = match &embedding {
            Some(vector) => {
                let candidates = self.storage.gate_candidates(
                    vector,
                    &parsed.spec_folder,
                    GATE_CANDIDATE_K,
                )?;
                gate::evaluate(&parsed.content, &candidates)
            }
            None => gate::GateDecision {
                action: PeAction::Create,
                candidate_id: None,
                similarity: None,
                reason: "no embedding available; gate bypassed".to_string(),
                contradiction: None,
                related_ids: Vec::new(),
            },
        };

        self.storage.log_conflict(
            &parsed.content_hash,
            decision.candidate_id,
            decision.similarity,
            decision.action.as_str(),
            decision.contradiction.is_some(),
            &decision.reason,
            &parsed.spec_folder,
        );
        tracing::info!(
            path = %parsed.file_path,
            action = %decision.action,
            similarity = ?decision.similarity,
            "gate decision"
        );

        let result = self.dispatch_decision(
            &parsed,
            file_mtime_ns,
            embedding.as_deref(),
            decision,
            existing.map(|e| e.id),
        )?;

        Ok(IndexResult {
            warnings,
            ..result
        })
    }

    fn dispatch_decision(
        &self,
        parsed: &ParsedMemory,
        file_mtime_ns: i64,
        embedding: Option<&[f32]>,
        decision: gate::GateDecision,
        existing_id: Option<i64>,
    ) -> Result<IndexResult> {
        let replace_update = || MemoryUpdate {
            title: Some(parsed.title.clone()),
            content: Some(parsed.content.clone()),
            content_hash: Some(parsed.content_hash.clone()),
            trigger_phrases: Some(parsed.trigger_phrases.clone()),
            context_type: Some(parsed.context_type),
            importance_tier: Some(parsed.importance_tier),
            file_mtime_ns: Some(file_mtime_ns),
            ..Default::default()
        };
        let new_row = |related: Option<Vec<i64>>| NewMemory {
            spec_folder: parsed.spec_folder.clone(),
            file_path: parsed.file_path.clone(),
            title: parsed.title.clone(),
            content: parsed.content.clone(),
            content_hash: parsed.content_hash.clone(),
            trigger_phrases: parsed.trigger_phrases.clone(),
            context_type: parsed.context_type,
            importance_tier: parsed.importance_tier,
            file_mtime_ns,
            related_memories: related,
        };

        // A changed file that already has a row always lands on that
        // row: reinforce when the gate saw a duplicate, replace
        // otherwise. Creating a second row would collide on file_path.
        if let Some(existing_id) = existing_id {
            if decision.action == PeAction::Reinforce
                && decision.candidate_id == Some(existing_id)
            {
                self.storage.review_memory(existing_id, crate::fsrs::Grade::Good)?;
                // Keep the file identity current so the next scan's
                // hash fast path sees this rewording as unchanged
                let refresh = MemoryUpdate {
                    content: Some(parsed.content.clone()),
                    content_hash: Some(parsed.content_hash.clone()),
                    file_mtime_ns: Some(file_mtime_ns),
                    ..Default::default()
                };
                self.storage.update_memory(existing_id, &refresh, embedding, false)?;
                return Ok(IndexResult {
                    status: IndexStatus::Reinforced,
                    id: existing_id,
                    pe_action: Some(decision.action),
                    pe_reason: Some(decision.reason),
                    similarity: decision.similarity,
                    superseded_id: None,
                    warnings: Vec::new(),
                });
            }
            self.storage
                .update_memory(existing_id, &replace_update(), embedding, true)?;
            if embedding.is_none() {
                self.storage
                    .update_embedding_status(existing_id, crate::memory::EmbeddingStatus::Pending)?;
            }
            return Ok(IndexResult {
                status: IndexStatus::Updated,
                id: existing_id,
                pe_action: Some(decision.action),
                pe_reason: Some(decision.reason),
                similarity: decision.similarity,
                superseded_id: None,
                warnings: Vec::new(),
            });
        }

        match decision.action {
            PeAction::Reinforce => {
                let candidate = decision.candidate_id.ok_or_else(|| {
                    StorageError::InvalidInput("reinforce decision without candidate".to_string())
                })?;
                self.storage.review_memory(candidate, crate::fsrs::Grade::Good)?;
                Ok(IndexResult {
                    status: IndexStatus::Reinforced,
                    id: candidate,
                    pe_action: Some(decision.action),
                    pe_reason: Some(decision.reason),
                    similarity: decision.similarity,
                    superseded_id: None,
                    warnings: Vec::new(),
                })
            }
            PeAction::Update => {
                let candidate = decision.candidate_id.ok_or_else(|| {
                    StorageError::InvalidInput("update decision without candidate".to_string())
                })?;
                // The row keeps its own file identity; only the
                // knowledge fields are replaced
                let mut update = replace_update();
                update.file_mtime_ns = None;
                self.storage.update_memory(candidate, &update, embedding, true)?;
                Ok(IndexResult {
                    status: IndexStatus::Updated,
                    id: candidate,
                    pe_action: Some(decision.action),
                    pe_reason: Some(decision.reason),
                    similarity: decision.similarity,
                    superseded_id: None,
                    warnings: Vec::new(),
                })
            }
            PeAction::Supersede => {
                let candidate = decision.candidate_id.ok_or_else(|| {
                    StorageError::InvalidInput("supersede decision without candidate".to_string())
                })?;
                self.storage.deprecate_memory(candidate)?;
                let id = self.storage.index_memory(&new_row(None), embedding)?;
                Ok(IndexResult {
                    status: IndexStatus::Superseded,
                    id,
                    pe_action: Some(decision.action),
                    pe_reason: Some(decision.reason),
                    similarity: decision.similarity,
                    superseded_id: Some(candidate),
                    warnings: Vec::new(),
                })
            }
            PeAction::CreateLinked => {
                let related = decision.related_ids.clone();
                let id = self
                    .storage
                    .index_memory(&new_row(Some(related)), embedding)?;
                Ok(IndexResult {
                    status: IndexStatus::Created,
                    id,
                    pe_action: Some(decision.action),
                    pe_reason: Some(decision.reason),
                    similarity: decision.similarity,
                    superseded_id: None,
                    warnings: Vec::new(),
                })
            }
            PeAction::Create => {
                let id = self.storage.index_memory(&new_row(None), embedding)?;
                Ok(IndexResult {
                    status: IndexStatus::Created,
                    id,
                    pe_action: Some(decision.action),
                    pe_reason: Some(decision.reason),
                    similarity: decision.similarity,
                    superseded_id: None,
                    warnings: Vec::new(),
                })
            }
        }
    }

    // ========================================================================
    // SCAN
    // ========================================================================

    /// Enumerate memory files under the allowed roots
    fn enumerate_files(&self, opts: &ScanOptions) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.base_dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let identity = self.relative_identity(path);
            if !parser::is_allowed_root(identity) {
                continue;
            }
            if parser::is_constitutional_path(identity) && !opts.include_constitutional {
                continue;
            }
            if let Some(filter) = &opts.spec_folder {
                match parser::derive_spec_folder(identity) {
                    Some(folder) if &folder == filter => {}
                    _ => continue,
                }
            }
            files.push(path.to_path_buf());
        }
        files.sort();
        files
    }

    /// Scan the allowed roots with the persisted cooldown, the
    /// incremental mtime+hash fast path, and bounded concurrency
    pub async fn scan(self: &Arc<Self>, opts: ScanOptions) -> Result<ScanReport> {
        self.storage.check_scan_cooldown()?;
        self.storage.record_scan_time()?;

        let files = self.enumerate_files(&opts);
        let mut report = ScanReport {
            scanned: files.len(),
            ..Default::default()
        };

        // Partition: unchanged-by-mtime, unchanged-by-hash (touch),
        // needs-indexing
        let mut needs_indexing = Vec::new();
        let mut touches: Vec<(i64, i64)> = Vec::new();
        for path in files {
            let identity = self.relative_identity(&path).to_string_lossy().to_string();
            if opts.incremental && !opts.force {
                if let Some(existing) = self.storage.get_memory_by_path(&identity)? {
                    let mtime_ns = file_mtime_ns(&path);
                    if existing.file_mtime_ns == mtime_ns && mtime_ns != 0 {
                        report.unchanged += 1;
                        continue;
                    }
                    let raw = match std::fs::read_to_string(&path) {
                        Ok(raw) => raw,
                        Err(e) => {
                            report.failed += 1;
                            report.files.push(FileOutcome {
                                path: identity,
                                status: "failed".to_string(),
                                id: None,
                                error: Some(e.to_string()),
                                warnings: Vec::new(),
                            });
                            continue;
                        }
                    };
                    if parser::content_hash(&raw) == existing.content_hash {
                        touches.push((existing.id, mtime_ns));
                        report.touched += 1;
                        continue;
                    }
                }
            }
            needs_indexing.push(path);
        }

        self.storage.touch_mtimes(&touches)?;

        // Index the remainder in bounded-concurrency batches
        let semaphore = Arc::new(Semaphore::new(SCAN_BATCH_CONCURRENCY));
        let mut handles = Vec::new();
        for path in needs_indexing {
            let indexer = Arc::clone(self);
            let permit_source = Arc::clone(&semaphore);
            let index_opts = IndexOptions {
                force: opts.force,
                allow_partial_update: true,
            };
            handles.push(tokio::spawn(async move {
                let _permit = permit_source.acquire_owned().await.expect("semaphore closed");
                let identity = indexer
                    .relative_identity(&path)
                    .to_string_lossy()
                    .to_string();
                let result = tokio::task::spawn_blocking(move || {
                    let outcome = indexer.index_memory_file(&path, index_opts);
                    (indexer, outcome)
                })
                .await;
                (identity, result)
            }));
        }

        for handle in handles {
            let (identity, joined) = handle.await.map_err(|e| {
                StorageError::Init(format!("scan task panicked: {e}"))
            })?;
            let outcome = match joined {
                Ok((_indexer, outcome)) => outcome,
                Err(e) => Err(StorageError::Init(format!("scan task panicked: {e}"))),
            };
            match outcome {
                Ok(result) => {
                    match result.status {
                        IndexStatus::Created => report.created += 1,
                        IndexStatus::Updated => report.updated += 1,
                        IndexStatus::Reinforced => report.reinforced += 1,
                        IndexStatus::Superseded => report.superseded += 1,
                        IndexStatus::Unchanged => report.unchanged += 1,
                    }
                    report.files.push(FileOutcome {
                        path: identity,
                        status: result.status.as_str().to_string(),
                        id: Some(result.id),
                        error: None,
                        warnings: result.warnings,
                    });
                }
                Err(e) => {
                    report.failed += 1;
                    report.files.push(FileOutcome {
                        path: identity,
                        status: "failed".to_string(),
                        id: None,
                        error: Some(e.to_string()),
                        warnings: Vec::new(),
                    });
                }
            }
        }

        tracing::info!(
            scanned = report.scanned,
            created = report.created,
            updated = report.updated,
            unchanged = report.unchanged,
            failed = report.failed,
            "index scan complete"
        );
        Ok(report)
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn file_mtime_ns(path: &Path) -> i64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

fn slugify(title: &str) -> String {
    let slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();
    let mut out = String::new();
    let mut last_dash = false;
    for c in slug.chars() {
        if c == '-' {
            if !last_dash && !out.is_empty() {
                out.push('-');
            }
            last_dash = true;
        } else {
            out.push(c);
            last_dash = false;
        }
    }
    out.trim_end_matches('-').to_string()
}

// ============================================================================
// TESTS
// ============================================================================
