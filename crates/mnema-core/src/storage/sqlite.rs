//! SQLite storage engine
//!
//! Embedded single-writer, multi-reader store. Owns the schema, the
//! durable vector rows, the FTS shadow (kept in sync by triggers), the
//! in-memory HNSW index, the trigger/constitutional caches, and the
//! `.db-updated` sentinel that makes external writes visible to
//! long-lived readers.
//!
//! All methods take `&self`; the MCP layer shares one `Arc<Storage>`.

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use lru::LruCache;
use rusqlite::{params, Connection, OptionalExtension};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::embeddings::{EmbeddingError, EmbeddingProfile, EmbeddingProvider};
use crate::fsrs::{self, FsrsState, Grade, ReviewOutcome};
use crate::gate::GateCandidate;
use crate::memory::{
    EmbeddingStatus, ImportanceTier, MemoryRecord, MemoryStats, MemoryUpdate, NewMemory,
};
use crate::search::{RetrievalConfig, TriggerCache, VectorIndex, VectorSearchError};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Config keys persisted across connections
pub const CONFIG_PROFILE_SLUG: &str = "profile_slug";
pub const CONFIG_EMBEDDING_DIM: &str = "embedding_dim";
pub const CONFIG_SCHEMA_VERSION: &str = "schema_version";
pub const CONFIG_LAST_SCAN_TIME_MS: &str = "last_scan_time_ms";

/// Index-scan cooldown window
pub const DEFAULT_SCAN_COOLDOWN_SECS: u64 = 60;

/// Capacity of the query-embedding LRU
const QUERY_CACHE_CAPACITY: usize = 100;

const MEMORY_COLUMNS: &str = "id, spec_folder, file_path, title, content_hash, content, \
     trigger_phrases, context_type, importance_tier, importance_weight, embedding_status, \
     file_mtime_ns, stability, difficulty, last_review, review_count, access_count, \
     last_accessed, confidence, validation_count, related_memories, created_at, updated_at";

// ============================================================================
// ERRORS
// ============================================================================

/// Storage error type
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Initialization error: {0}")]
    Init(String),
    #[error("Embedding dimension mismatch: store has {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("Rate limited: retry in {wait_seconds}s")]
    RateLimited { wait_seconds: u64 },
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Vector(#[from] VectorSearchError),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Parse failed: {0}")]
    Parse(String),
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

// ============================================================================
// VECTOR ENCODING
// ============================================================================

/// Encode an embedding as little-endian f32 bytes
pub fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode little-endian f32 bytes; `None` on a torn blob
pub fn vector_from_bytes(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

// ============================================================================
// INTEGRITY
// ============================================================================

/// Result of an integrity pass
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    /// Vector rows with no parent memory
    pub orphaned_vectors: Vec<i64>,
    /// Memory rows claiming success with no vector row
    pub missing_vectors: Vec<i64>,
    /// Vector rows whose stored dimension differs from the profile
    pub dimension_mismatches: Vec<i64>,
    /// Orphans removed this pass (only with auto_clean)
    pub cleaned: usize,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned_vectors.is_empty()
            && self.missing_vectors.is_empty()
            && self.dimension_mismatches.is_empty()
    }
}

// ============================================================================
// CONSTITUTIONAL CACHE
// ============================================================================

/// Process-local cache of the constitutional subset, validated against
/// the database file's mtime
#[derive(Debug, Default)]
struct ConstitutionalCache {
    rows: Vec<MemoryRecord>,
    db_mtime_ns: i64,
    loaded: bool,
}

impl ConstitutionalCache {
    fn invalidate(&mut self) {
        self.loaded = false;
    }
}

// ============================================================================
// STORAGE
// ============================================================================

/// The embedded store
pub struct Storage {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    provider: Arc<dyn EmbeddingProvider>,
    profile: EmbeddingProfile,
    db_path: PathBuf,
    sentinel_path: PathBuf,
    vector_index: Mutex<VectorIndex>,
    trigger_cache: Mutex<TriggerCache>,
    constitutional: Mutex<ConstitutionalCache>,
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
    /// Bumped on every memory write; trigger cache rebuilds when stale
    write_generation: AtomicU64,
    /// Last `.db-updated` value this process acted on
    sentinel_seen: AtomicI64,
    pub(crate) retrieval: RetrievalConfig,
    scan_cooldown_secs: u64,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("db_path", &self.db_path)
            .field("sentinel_path", &self.sentinel_path)
            .finish_non_exhaustive()
    }
}

impl Storage {
    /// Apply PRAGMAs shared by both connections
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Open (and migrate) the store for the given embedding profile
    ///
    /// With no explicit path the store lives in the platform data
    /// directory as `context-index-<profile_slug>.sqlite`. Fails with
    /// [`StorageError::DimensionMismatch`] when the store was built
    /// with a different vector dimension; writes are refused until the
    /// profile is reconciled or the store rebuilt.
    pub fn open(db_path: Option<PathBuf>, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let profile = provider.profile();
        let path = match db_path {
            Some(p) => p,
            None => {
                let proj_dirs = ProjectDirs::from("dev", "mnema", "mnema").ok_or_else(|| {
                    StorageError::Init("could not determine project directories".to_string())
                })?;
                let data_dir = proj_dirs.data_dir();
                std::fs::create_dir_all(data_dir)?;
                data_dir.join(format!("context-index-{}.sqlite", profile.slug()))
            }
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut writer = Connection::open(&path)?;
        Self::configure_connection(&writer)?;
        super::migrations::apply_migrations(&mut writer)?;

        // Dimension check before anything touches vectors
        match Self::config_get_conn(&writer, CONFIG_EMBEDDING_DIM)? {
            Some(stored) => {
                let stored_dim: usize = stored.parse().map_err(|_| {
                    StorageError::Init(format!("corrupt {CONFIG_EMBEDDING_DIM} config: {stored}"))
                })?;
                if stored_dim != profile.dim {
                    return Err(StorageError::DimensionMismatch {
                        expected: stored_dim,
                        got: profile.dim,
                    });
                }
            }
            None => {
                Self::config_set_conn(&writer, CONFIG_EMBEDDING_DIM, &profile.dim.to_string())?;
                Self::config_set_conn(&writer, CONFIG_PROFILE_SLUG, &profile.slug())?;
            }
        }
        Self::config_set_conn(
            &writer,
            CONFIG_SCHEMA_VERSION,
            &super::migrations::latest_version().to_string(),
        )?;

        let reader = Connection::open(&path)?;
        Self::configure_connection(&reader)?;

        let vector_index = VectorIndex::new(profile.dim)
            .map_err(|e| StorageError::Init(format!("failed to create vector index: {e}")))?;

        let sentinel_path = path
            .parent()
            .map(|dir| dir.join(".db-updated"))
            .unwrap_or_else(|| PathBuf::from(".db-updated"));
        let sentinel_seen = Self::read_sentinel_file(&sentinel_path);

        let storage = Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            provider,
            profile,
            db_path: path,
            sentinel_path,
            vector_index: Mutex::new(vector_index),
            trigger_cache: Mutex::new(TriggerCache::empty()),
            constitutional: Mutex::new(ConstitutionalCache::default()),
            query_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(QUERY_CACHE_CAPACITY).expect("capacity is non-zero"),
            )),
            write_generation: AtomicU64::new(1),
            sentinel_seen: AtomicI64::new(sentinel_seen),
            retrieval: RetrievalConfig::default(),
            scan_cooldown_secs: DEFAULT_SCAN_COOLDOWN_SECS,
        };

        storage.reload_vector_index()?;
        Ok(storage)
    }

    pub fn profile(&self) -> &EmbeddingProfile {
        &self.profile
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn scan_cooldown_secs(&self) -> u64 {
        self.scan_cooldown_secs
    }

    pub fn set_scan_cooldown_secs(&mut self, secs: u64) {
        self.scan_cooldown_secs = secs;
    }

    // ========================================================================
    // LOCK HELPERS
    // ========================================================================

    pub(crate) fn writer(&self) -> Result<MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| StorageError::Init("writer lock poisoned".to_string()))
    }

    pub(crate) fn reader(&self) -> Result<MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| StorageError::Init("reader lock poisoned".to_string()))
    }

    /// Run `f` inside a writer transaction; rolls back on error
    pub(crate) fn with_tx<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut writer = self.writer()?;
        let tx = writer.transaction()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => Err(e), // tx rolls back on drop
        }
    }

    pub(crate) fn vector_index(&self) -> Result<MutexGuard<'_, VectorIndex>> {
        self.vector_index
            .lock()
            .map_err(|_| StorageError::Init("vector index lock poisoned".to_string()))
    }

    pub(crate) fn query_cache(&self) -> Result<MutexGuard<'_, LruCache<String, Vec<f32>>>> {
        self.query_cache
            .lock()
            .map_err(|_| StorageError::Init("query cache lock poisoned".to_string()))
    }

    // ========================================================================
    // CONFIG
    // ========================================================================

    fn config_get_conn(conn: &Connection, key: &str) -> Result<Option<String>> {
        let value = conn
            .prepare_cached("SELECT value FROM config WHERE key = ?1")?
            .query_row([key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn config_set_conn(conn: &Connection, key: &str, value: &str) -> Result<()> {
        conn.prepare_cached(
            "INSERT INTO config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )?
        .execute([key, value])?;
        Ok(())
    }

    pub fn config_get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.reader()?;
        Self::config_get_conn(&conn, key)
    }

    pub fn config_set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.writer()?;
        Self::config_set_conn(&conn, key, value)
    }

    // ========================================================================
    // SCAN RATE LIMIT
    // ========================================================================

    /// Enforce the index-scan cooldown window
    pub fn check_scan_cooldown(&self) -> Result<()> {
        let last_ms: i64 = self
            .config_get(CONFIG_LAST_SCAN_TIME_MS)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let now_ms = Utc::now().timestamp_millis();
        let elapsed_secs = ((now_ms - last_ms).max(0) / 1000) as u64;
        if last_ms > 0 && elapsed_secs < self.scan_cooldown_secs {
            let wait_seconds = self.scan_cooldown_secs - elapsed_secs;
            tracing::info!(wait_seconds, "index scan rate limited");
            return Err(StorageError::RateLimited { wait_seconds });
        }
        Ok(())
    }

    pub fn record_scan_time(&self) -> Result<()> {
        self.config_set(
            CONFIG_LAST_SCAN_TIME_MS,
            &Utc::now().timestamp_millis().to_string(),
        )
    }

    // ========================================================================
    // SENTINEL / CROSS-CONNECTION VISIBILITY
    // ========================================================================

    fn read_sentinel_file(path: &Path) -> i64 {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Advance the `.db-updated` sentinel after a committed write
    ///
    /// The value is monotonically non-decreasing; the file is replaced
    /// atomically so concurrent readers never observe a torn value.
    pub fn bump_sentinel(&self) {
        let current = Self::read_sentinel_file(&self.sentinel_path);
        let next = (Utc::now().timestamp_millis()).max(current + 1);
        let tmp = self.sentinel_path.with_extension("tmp");
        let result = std::fs::write(&tmp, next.to_string())
            .and_then(|_| std::fs::rename(&tmp, &self.sentinel_path));
        match result {
            Ok(()) => {
                self.sentinel_seen.store(next, Ordering::SeqCst);
            }
            Err(e) => tracing::warn!("failed to bump sentinel: {e}"),
        }
    }

    /// Check the sentinel; on an external bump, reload every derived
    /// cache before the caller proceeds. Returns whether a reload ran.
    pub fn check_external_update(&self) -> Result<bool> {
        let current = Self::read_sentinel_file(&self.sentinel_path);
        let seen = self.sentinel_seen.load(Ordering::SeqCst);
        if current <= seen {
            return Ok(false);
        }
        tracing::info!(sentinel = current, "external store update detected, reloading caches");
        self.sentinel_seen.store(current, Ordering::SeqCst);
        self.invalidate_caches();
        self.clear_prepared_statements()?;
        self.reload_vector_index()?;
        Ok(true)
    }

    /// Mark every derived cache stale
    pub(crate) fn invalidate_caches(&self) {
        self.write_generation.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut cache) = self.constitutional.lock() {
            cache.invalidate();
        }
        if let Ok(mut cache) = self.query_cache.lock() {
            cache.clear();
        }
    }

    pub(crate) fn write_generation(&self) -> u64 {
        self.write_generation.load(Ordering::SeqCst)
    }

    /// Drop both connections' prepared-statement caches
    pub fn clear_prepared_statements(&self) -> Result<()> {
        self.writer()?.flush_prepared_statement_cache();
        self.reader()?.flush_prepared_statement_cache();
        Ok(())
    }

    /// Rebuild the HNSW index from the durable vector rows
    pub(crate) fn reload_vector_index(&self) -> Result<()> {
        let rows: Vec<(i64, Vec<u8>)> = {
            let reader = self.reader()?;
            let mut stmt =
                reader.prepare_cached("SELECT memory_id, embedding FROM memory_vectors")?;
            let mapped = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            mapped.collect::<rusqlite::Result<_>>()?
        };

        let mut index = self.vector_index()?;
        index.clear()?;
        for (memory_id, blob) in rows {
            match vector_from_bytes(&blob) {
                Some(vector) if vector.len() == self.profile.dim => {
                    if let Err(e) = index.add(memory_id, &vector) {
                        tracing::warn!(memory_id, "failed to index vector: {e}");
                    }
                }
                _ => tracing::warn!(memory_id, "skipping vector with wrong dimension"),
            }
        }
        Ok(())
    }

    // ========================================================================
    // ROW MAPPING
    // ========================================================================

    pub(crate) fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRecord> {
        let trigger_json: String = row.get(6)?;
        let context_type: String = row.get(7)?;
        let tier: String = row.get(8)?;
        let status: String = row.get(10)?;
        let related_json: Option<String> = row.get(20)?;

        Ok(MemoryRecord {
            id: row.get(0)?,
            spec_folder: row.get(1)?,
            file_path: row.get(2)?,
            title: row.get(3)?,
            content_hash: row.get(4)?,
            content: row.get(5)?,
            trigger_phrases: serde_json::from_str(&trigger_json).unwrap_or_default(),
            context_type: crate::memory::ContextType::parse(&context_type).unwrap_or_default(),
            importance_tier: ImportanceTier::parse(&tier).unwrap_or_default(),
            importance_weight: row.get(9)?,
            embedding_status: EmbeddingStatus::parse(&status).unwrap_or_default(),
            file_mtime_ns: row.get(11)?,
            stability: row.get(12)?,
            difficulty: row.get(13)?,
            last_review: row.get(14)?,
            review_count: row.get(15)?,
            access_count: row.get(16)?,
            last_accessed: row.get(17)?,
            confidence: row.get(18)?,
            validation_count: row.get(19)?,
            related_memories: related_json.and_then(|j| serde_json::from_str(&j).ok()),
            created_at: row.get(21)?,
            updated_at: row.get(22)?,
        })
    }

    // ========================================================================
    // MEMORY CRUD
    // ========================================================================

    fn ensure_dimension(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.profile.dim {
            return Err(StorageError::DimensionMismatch {
                expected: self.profile.dim,
                got: embedding.len(),
            });
        }
        Ok(())
    }

    /// Insert a memory row with its vector, FTS shadow, and trigger
    /// entries in one transaction
    pub fn index_memory(&self, new: &NewMemory, embedding: Option<&[f32]>) -> Result<i64> {
        if let Some(vec) = embedding {
            self.ensure_dimension(vec)?;
        }
        let now = Utc::now();
        let status = if embedding.is_some() {
            EmbeddingStatus::Success
        } else {
            EmbeddingStatus::Pending
        };
        let triggers_json = serde_json::to_string(&new.trigger_phrases)
            .map_err(|e| StorageError::InvalidInput(e.to_string()))?;
        let related_json = new
            .related_memories
            .as_ref()
            .map(|ids| serde_json::to_string(ids))
            .transpose()
            .map_err(|e| StorageError::InvalidInput(e.to_string()))?;

        let id = self.with_tx(|tx| {
            tx.prepare_cached(
                "INSERT INTO memory_index (
                    spec_folder, file_path, title, content_hash, content,
                    trigger_phrases, context_type, importance_tier, importance_weight,
                    embedding_status, file_mtime_ns,
                    stability, difficulty, last_review, review_count,
                    access_count, confidence, validation_count, related_memories,
                    created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
            )?
            .execute(params![
                new.spec_folder,
                new.file_path,
                new.title,
                new.content_hash,
                new.content,
                triggers_json,
                new.context_type.as_str(),
                new.importance_tier.as_str(),
                new.importance_tier.weight(),
                status.as_str(),
                new.file_mtime_ns,
                fsrs::DEFAULT_STABILITY,
                fsrs::DEFAULT_DIFFICULTY,
                now,
                0,
                0,
                0.5,
                0,
                related_json,
                now,
                now,
            ])?;
            let id = tx.last_insert_rowid();

            if let Some(vec) = embedding {
                tx.prepare_cached(
                    "INSERT INTO memory_vectors (memory_id, embedding, dimensions, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                )?
                .execute(params![id, vector_to_bytes(vec), vec.len() as i64, now])?;
            }
            Ok(id)
        })?;

        if let Some(vec) = embedding {
            self.vector_index()?.add(id, vec)?;
        }
        self.invalidate_caches();
        self.bump_sentinel();
        tracing::debug!(id, path = %new.file_path, "indexed memory");
        Ok(id)
    }

    /// Apply a partial update; replaces the vector when one is given
    ///
    /// `bump_review` additionally increments `review_count`, as the
    /// UPDATE gate decision requires.
    pub fn update_memory(
        &self,
        id: i64,
        update: &MemoryUpdate,
        embedding: Option<&[f32]>,
        bump_review: bool,
    ) -> Result<()> {
        if let Some(vec) = embedding {
            self.ensure_dimension(vec)?;
        }
        if update.is_empty() && embedding.is_none() && !bump_review {
            return Ok(());
        }
        let now = Utc::now();

        self.with_tx(|tx| {
            let exists: Option<i64> = tx
                .prepare_cached("SELECT id FROM memory_index WHERE id = ?1")?
                .query_row([id], |row| row.get(0))
                .optional()?;
            if exists.is_none() {
                return Err(StorageError::NotFound(format!("memory {id}")));
            }

            fn push(
                sets: &mut Vec<String>,
                values: &mut Vec<Box<dyn rusqlite::ToSql>>,
                column: &str,
                value: Box<dyn rusqlite::ToSql>,
            ) {
                values.push(value);
                sets.push(format!("{column} = ?{}", values.len()));
            }

            let mut sets: Vec<String> = vec!["updated_at = ?1".to_string()];
            let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(now)];

            if let Some(title) = &update.title {
                push(&mut sets, &mut values, "title", Box::new(title.clone()));
            }
            if let Some(content) = &update.content {
                push(&mut sets, &mut values, "content", Box::new(content.clone()));
            }
            if let Some(hash) = &update.content_hash {
                push(&mut sets, &mut values, "content_hash", Box::new(hash.clone()));
            }
            if let Some(triggers) = &update.trigger_phrases {
                let json = serde_json::to_string(triggers)
                    .map_err(|e| StorageError::InvalidInput(e.to_string()))?;
                push(&mut sets, &mut values, "trigger_phrases", Box::new(json));
            }
            if let Some(ct) = update.context_type {
                push(&mut sets, &mut values, "context_type", Box::new(ct.as_str().to_string()));
            }
            if let Some(tier) = update.importance_tier {
                push(&mut sets, &mut values, "importance_tier", Box::new(tier.as_str().to_string()));
                push(&mut sets, &mut values, "importance_weight", Box::new(tier.weight()));
            }
            if let Some(mtime) = update.file_mtime_ns {
                push(&mut sets, &mut values, "file_mtime_ns", Box::new(mtime));
            }
            if let Some(confidence) = update.confidence {
                push(&mut sets, &mut values, "confidence", Box::new(confidence));
            }
            if let Some(related) = &update.related_memories {
                let json = serde_json::to_string(related)
                    .map_err(|e| StorageError::InvalidInput(e.to_string()))?;
                push(&mut sets, &mut values, "related_memories", Box::new(json));
            }
            if embedding.is_some() {
                push(
                    &mut sets,
                    &mut values,
                    "embedding_status",
                    Box::new(EmbeddingStatus::Success.as_str().to_string()),
                );
            }
            if bump_review {
                sets.push("review_count = review_count + 1".to_string());
                push(&mut sets, &mut values, "last_review", Box::new(now));
            }

            values.push(Box::new(id));
            let sql = format!(
                "UPDATE memory_index SET {} WHERE id = ?{}",
                sets.join(", "),
                values.len()
            );
            tx.execute(&sql, rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())))?;

            if let Some(vec) = embedding {
                tx.prepare_cached(
                    "INSERT INTO memory_vectors (memory_id, embedding, dimensions, created_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(memory_id) DO UPDATE SET
                         embedding = excluded.embedding,
                         dimensions = excluded.dimensions,
                         created_at = excluded.created_at",
                )?
                .execute(params![id, vector_to_bytes(vec), vec.len() as i64, now])?;
            }
            Ok(())
        })?;

        if let Some(vec) = embedding {
            self.vector_index()?.add(id, vec)?;
        }
        self.invalidate_caches();
        self.bump_sentinel();
        Ok(())
    }

    /// Delete a memory; cascades to its vector, FTS row, working-memory
    /// entries, and incident causal edges. Returns false when absent.
    pub fn delete_memory(&self, id: i64) -> Result<bool> {
        let deleted = self.with_tx(|tx| {
            let count = tx
                .prepare_cached("DELETE FROM memory_index WHERE id = ?1")?
                .execute([id])?;
            Ok(count > 0)
        })?;
        if deleted {
            self.vector_index()?.remove(id);
            self.invalidate_caches();
            self.bump_sentinel();
            tracing::debug!(id, "deleted memory");
        }
        Ok(deleted)
    }

    /// Delete every memory in a folder; returns the deleted ids
    pub fn delete_folder(&self, spec_folder: &str) -> Result<Vec<i64>> {
        let ids: Vec<i64> = {
            let reader = self.reader()?;
            let mut stmt =
                reader.prepare_cached("SELECT id FROM memory_index WHERE spec_folder = ?1")?;
            let mapped = stmt.query_map([spec_folder], |row| row.get(0))?;
            mapped.collect::<rusqlite::Result<_>>()?
        };
        if ids.is_empty() {
            return Ok(ids);
        }
        self.with_tx(|tx| {
            tx.prepare_cached("DELETE FROM memory_index WHERE spec_folder = ?1")?
                .execute([spec_folder])?;
            Ok(())
        })?;
        {
            let mut index = self.vector_index()?;
            for id in &ids {
                index.remove(*id);
            }
        }
        self.invalidate_caches();
        self.bump_sentinel();
        tracing::info!(spec_folder, count = ids.len(), "bulk-deleted folder");
        Ok(ids)
    }

    pub fn get_memory(&self, id: i64) -> Result<Option<MemoryRecord>> {
        let reader = self.reader()?;
        let record = reader
            .prepare_cached(&format!(
                "SELECT {MEMORY_COLUMNS} FROM memory_index WHERE id = ?1"
            ))?
            .query_row([id], Self::row_to_memory)
            .optional()?;
        Ok(record)
    }

    pub fn get_memory_by_path(&self, file_path: &str) -> Result<Option<MemoryRecord>> {
        let reader = self.reader()?;
        let record = reader
            .prepare_cached(&format!(
                "SELECT {MEMORY_COLUMNS} FROM memory_index WHERE file_path = ?1"
            ))?
            .query_row([file_path], Self::row_to_memory)
            .optional()?;
        Ok(record)
    }

    pub fn get_memories_by_folder(&self, spec_folder: &str) -> Result<Vec<MemoryRecord>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare_cached(&format!(
            "SELECT {MEMORY_COLUMNS} FROM memory_index WHERE spec_folder = ?1 ORDER BY id"
        ))?;
        let mapped = stmt.query_map([spec_folder], Self::row_to_memory)?;
        Ok(mapped.collect::<rusqlite::Result<_>>()?)
    }

    /// List with optional folder/tier filters
    pub fn list_memories(
        &self,
        spec_folder: Option<&str>,
        tier: Option<ImportanceTier>,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>> {
        let reader = self.reader()?;
        let mut sql = format!("SELECT {MEMORY_COLUMNS} FROM memory_index WHERE 1=1");
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(folder) = spec_folder {
            values.push(Box::new(folder.to_string()));
            sql.push_str(&format!(" AND spec_folder = ?{}", values.len()));
        }
        if let Some(tier) = tier {
            values.push(Box::new(tier.as_str().to_string()));
            sql.push_str(&format!(" AND importance_tier = ?{}", values.len()));
        }
        values.push(Box::new(limit as i64));
        sql.push_str(&format!(" ORDER BY updated_at DESC LIMIT ?{}", values.len()));

        let mut stmt = reader.prepare_cached(&sql)?;
        let mapped = stmt.query_map(
            rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())),
            Self::row_to_memory,
        )?;
        Ok(mapped.collect::<rusqlite::Result<_>>()?)
    }

    pub fn update_embedding_status(&self, id: i64, status: EmbeddingStatus) -> Result<()> {
        let count = self.writer()?
            .prepare_cached("UPDATE memory_index SET embedding_status = ?1, updated_at = ?2 WHERE id = ?3")?
            .execute(params![status.as_str(), Utc::now(), id])?;
        if count == 0 {
            return Err(StorageError::NotFound(format!("memory {id}")));
        }
        Ok(())
    }

    /// Batch-update mtimes for files whose content did not change.
    /// Leaves `updated_at` untouched so the rows read as unchanged.
    pub fn touch_mtimes(&self, updates: &[(i64, i64)]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        self.with_tx(|tx| {
            let mut stmt =
                tx.prepare_cached("UPDATE memory_index SET file_mtime_ns = ?1 WHERE id = ?2")?;
            for (id, mtime_ns) in updates {
                stmt.execute(params![mtime_ns, id])?;
            }
            Ok(())
        })
    }

    /// Retire a memory after a SUPERSEDE decision; the embedding stays
    /// resident but the row leaves PE-gate neighbor searches
    pub fn deprecate_memory(&self, id: i64) -> Result<()> {
        let count = self.writer()?
            .prepare_cached(
                "UPDATE memory_index SET importance_tier = 'deprecated', importance_weight = ?1, updated_at = ?2 WHERE id = ?3",
            )?
            .execute(params![ImportanceTier::Deprecated.weight(), Utc::now(), id])?;
        if count == 0 {
            return Err(StorageError::NotFound(format!("memory {id}")));
        }
        self.invalidate_caches();
        self.bump_sentinel();
        Ok(())
    }

    // ========================================================================
    // FSRS INTEGRATION
    // ========================================================================

    /// Apply a graded review to a memory's scheduling state
    pub fn review_memory(&self, id: i64, grade: Grade) -> Result<ReviewOutcome> {
        let record = self
            .get_memory(id)?
            .ok_or_else(|| StorageError::NotFound(format!("memory {id}")))?;
        let now = Utc::now();
        let outcome = fsrs::review(
            FsrsState {
                stability: record.stability,
                difficulty: record.difficulty,
            },
            record.last_review,
            now,
            grade,
        );
        self.writer()?
            .prepare_cached(
                "UPDATE memory_index SET stability = ?1, difficulty = ?2, last_review = ?3,
                 review_count = review_count + 1, updated_at = ?4 WHERE id = ?5",
            )?
            .execute(params![
                outcome.state.stability,
                outcome.state.difficulty,
                now,
                now,
                id
            ])?;
        Ok(outcome)
    }

    /// Testing effect: every retrieval strengthens the returned memory
    ///
    /// Grade GOOD with the retrieval bonus `1 + max(0, 0.9 - R) * 0.5`.
    /// Also bumps `access_count` and `last_accessed`. Callers log and
    /// swallow failures so retrieval never breaks on a write error.
    pub fn strengthen_on_access(&self, id: i64) -> Result<f64> {
        let record = self
            .get_memory(id)?
            .ok_or_else(|| StorageError::NotFound(format!("memory {id}")))?;
        let now = Utc::now();
        let outcome = fsrs::review(
            FsrsState {
                stability: record.stability,
                difficulty: record.difficulty,
            },
            record.last_review,
            now,
            Grade::Good,
        );
        let boosted = outcome.state.stability * fsrs::access_bonus(outcome.retrievability);
        self.writer()?
            .prepare_cached(
                "UPDATE memory_index SET stability = ?1, difficulty = ?2, last_review = ?3,
                 review_count = review_count + 1, access_count = access_count + 1,
                 last_accessed = ?4, updated_at = ?5 WHERE id = ?6",
            )?
            .execute(params![
                boosted,
                outcome.state.difficulty,
                now,
                now,
                now,
                id
            ])?;
        Ok(outcome.retrievability)
    }

    // ========================================================================
    // PE-GATE SUPPORT
    // ========================================================================

    /// Top-k nearest non-deprecated memories in a folder, for the gate
    pub fn gate_candidates(
        &self,
        embedding: &[f32],
        spec_folder: &str,
        k: usize,
    ) -> Result<Vec<GateCandidate>> {
        self.ensure_dimension(embedding)?;
        // Over-fetch: folder and tier filters discard index hits
        let raw = self.vector_index()?.search(embedding, (k * 8).max(32))?;
        let min_sim = self.retrieval.neighbor_min_similarity;

        let mut candidates = Vec::new();
        for (id, similarity) in raw {
            if similarity < min_sim {
                continue;
            }
            let Some(record) = self.get_memory(id)? else {
                continue;
            };
            if record.spec_folder != spec_folder
                || record.importance_tier == ImportanceTier::Deprecated
            {
                continue;
            }
            candidates.push(GateCandidate {
                id: record.id,
                similarity,
                content: record.content.unwrap_or_default(),
                stability: record.stability,
                difficulty: record.difficulty,
                file_path: record.file_path,
            });
            if candidates.len() == k {
                break;
            }
        }
        Ok(candidates)
    }

    /// Append a gate decision to the audit log. Best-effort: failures
    /// are logged and swallowed so they cannot fail the primary write.
    pub fn log_conflict(
        &self,
        new_memory_hash: &str,
        existing_memory_id: Option<i64>,
        similarity: Option<f32>,
        action: &str,
        contradiction_detected: bool,
        notes: &str,
        spec_folder: &str,
    ) {
        let result = self.writer().and_then(|writer| {
            writer
                .prepare_cached(
                    "INSERT INTO memory_conflicts (
                        new_memory_hash, existing_memory_id, similarity_score, action,
                        contradiction_detected, notes, spec_folder, created_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )?
                .execute(params![
                    new_memory_hash,
                    existing_memory_id,
                    similarity.map(|s| s as f64),
                    action,
                    contradiction_detected,
                    notes,
                    spec_folder,
                    Utc::now(),
                ])?;
            Ok(())
        });
        if let Err(e) = result {
            tracing::warn!("failed to log gate decision: {e}");
        }
    }

    /// Read the conflict log, newest first
    pub fn conflict_log(&self, spec_folder: Option<&str>, limit: usize) -> Result<Vec<serde_json::Value>> {
        let reader = self.reader()?;
        let mut sql = "SELECT new_memory_hash, existing_memory_id, similarity_score, action, \
             contradiction_detected, notes, spec_folder, created_at FROM memory_conflicts"
            .to_string();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(folder) = spec_folder {
            values.push(Box::new(folder.to_string()));
            sql.push_str(" WHERE spec_folder = ?1");
        }
        values.push(Box::new(limit as i64));
        sql.push_str(&format!(" ORDER BY id DESC LIMIT ?{}", values.len()));

        let mut stmt = reader.prepare_cached(&sql)?;
        let mapped = stmt.query_map(
            rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())),
            |row| {
                let created: DateTime<Utc> = row.get(7)?;
                Ok(serde_json::json!({
                    "new_memory_hash": row.get::<_, String>(0)?,
                    "existing_memory_id": row.get::<_, Option<i64>>(1)?,
                    "similarity_score": row.get::<_, Option<f64>>(2)?,
                    "action": row.get::<_, String>(3)?,
                    "contradiction_detected": row.get::<_, bool>(4)?,
                    "notes": row.get::<_, Option<String>>(5)?,
                    "spec_folder": row.get::<_, Option<String>>(6)?,
                    "created_at": created.to_rfc3339(),
                }))
            },
        )?;
        Ok(mapped.collect::<rusqlite::Result<_>>()?)
    }

    // ========================================================================
    // CACHES
    // ========================================================================

    /// Constitutional rows, cached until the db file mtime advances
    pub fn constitutional_rows(&self) -> Result<Vec<MemoryRecord>> {
        let mtime_ns = std::fs::metadata(&self.db_path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);

        let mut cache = self
            .constitutional
            .lock()
            .map_err(|_| StorageError::Init("constitutional cache lock poisoned".to_string()))?;
        if cache.loaded && cache.db_mtime_ns == mtime_ns {
            return Ok(cache.rows.clone());
        }

        let rows = self.list_memories(None, Some(ImportanceTier::Constitutional), 1000)?;
        cache.rows = rows.clone();
        cache.db_mtime_ns = mtime_ns;
        cache.loaded = true;
        tracing::debug!(count = rows.len(), "reloaded constitutional cache");
        Ok(rows)
    }

    /// Run `f` against a fresh trigger cache, rebuilding if stale
    pub(crate) fn with_trigger_cache<T>(&self, f: impl FnOnce(&TriggerCache) -> T) -> Result<T> {
        let generation = self.write_generation();
        let mut cache = self
            .trigger_cache
            .lock()
            .map_err(|_| StorageError::Init("trigger cache lock poisoned".to_string()))?;
        if cache.generation() != generation {
            let rows: Vec<(i64, f64, Vec<String>)> = {
                let reader = self.reader()?;
                let mut stmt = reader.prepare_cached(
                    "SELECT id, importance_weight, trigger_phrases FROM memory_index",
                )?;
                let mapped = stmt.query_map([], |row| {
                    let triggers: String = row.get(2)?;
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        serde_json::from_str(&triggers).unwrap_or_default(),
                    ))
                })?;
                mapped.collect::<rusqlite::Result<_>>()?
            };
            *cache = TriggerCache::build(rows, generation);
            tracing::debug!(generation, phrases = cache.phrase_count(), "rebuilt trigger cache");
        }
        Ok(f(&cache))
    }

    // ========================================================================
    // INTEGRITY / STATS
    // ========================================================================

    /// Detect orphaned vectors, missing vectors, and dimension drift.
    /// With `auto_clean`, orphaned vector rows are deleted; memories are
    /// never deleted by this pass.
    pub fn verify_integrity(&self, auto_clean: bool) -> Result<IntegrityReport> {
        let orphaned_vectors: Vec<i64> = {
            let reader = self.reader()?;
            let mut stmt = reader.prepare_cached(
                "SELECT v.memory_id FROM memory_vectors v
                 LEFT JOIN memory_index m ON m.id = v.memory_id
                 WHERE m.id IS NULL",
            )?;
            let mapped = stmt.query_map([], |row| row.get(0))?;
            mapped.collect::<rusqlite::Result<_>>()?
        };

        let missing_vectors: Vec<i64> = {
            let reader = self.reader()?;
            let mut stmt = reader.prepare_cached(
                "SELECT m.id FROM memory_index m
                 LEFT JOIN memory_vectors v ON v.memory_id = m.id
                 WHERE m.embedding_status = 'success' AND v.memory_id IS NULL",
            )?;
            let mapped = stmt.query_map([], |row| row.get(0))?;
            mapped.collect::<rusqlite::Result<_>>()?
        };

        let dimension_mismatches: Vec<i64> = {
            let reader = self.reader()?;
            let mut stmt = reader.prepare_cached(
                "SELECT memory_id FROM memory_vectors WHERE dimensions != ?1",
            )?;
            let mapped = stmt.query_map([self.profile.dim as i64], |row| row.get(0))?;
            mapped.collect::<rusqlite::Result<_>>()?
        };

        let mut cleaned = 0;
        if auto_clean && !orphaned_vectors.is_empty() {
            cleaned = self.with_tx(|tx| {
                let mut stmt =
                    tx.prepare_cached("DELETE FROM memory_vectors WHERE memory_id = ?1")?;
                let mut count = 0;
                for id in &orphaned_vectors {
                    count += stmt.execute([id])?;
                }
                Ok(count)
            })?;
            let mut index = self.vector_index()?;
            for id in &orphaned_vectors {
                index.remove(*id);
            }
            tracing::info!(cleaned, "removed orphaned vectors");
        }

        Ok(IntegrityReport {
            orphaned_vectors,
            missing_vectors,
            dimension_mismatches,
            cleaned,
        })
    }

    /// Aggregate store statistics
    pub fn stats(&self) -> Result<MemoryStats> {
        let reader = self.reader()?;

        let group_counts = |sql: &str| -> Result<Vec<(String, i64)>> {
            let mut stmt = reader.prepare_cached(sql)?;
            let mapped = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            Ok(mapped.collect::<rusqlite::Result<_>>()?)
        };

        let by_tier = group_counts(
            "SELECT importance_tier, COUNT(*) FROM memory_index GROUP BY importance_tier ORDER BY COUNT(*) DESC",
        )?;
        let by_context_type = group_counts(
            "SELECT context_type, COUNT(*) FROM memory_index GROUP BY context_type ORDER BY COUNT(*) DESC",
        )?;
        let by_folder = group_counts(
            "SELECT spec_folder, COUNT(*) FROM memory_index GROUP BY spec_folder ORDER BY COUNT(*) DESC",
        )?;

        let (total, embedded, pending, failed, avg_stability, avg_difficulty, total_accesses) =
            reader.query_row(
                "SELECT COUNT(*),
                        SUM(CASE WHEN embedding_status = 'success' THEN 1 ELSE 0 END),
                        SUM(CASE WHEN embedding_status = 'pending' THEN 1 ELSE 0 END),
                        SUM(CASE WHEN embedding_status = 'failed' THEN 1 ELSE 0 END),
                        COALESCE(AVG(stability), 0),
                        COALESCE(AVG(difficulty), 0),
                        COALESCE(SUM(access_count), 0)
                 FROM memory_index",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                        row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                        row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                        row.get::<_, f64>(4)?,
                        row.get::<_, f64>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )?;

        Ok(MemoryStats {
            total_memories: total,
            by_tier,
            by_context_type,
            by_folder,
            embedded,
            pending_embeddings: pending,
            failed_embeddings: failed,
            avg_stability,
            avg_difficulty,
            total_accesses,
        })
    }

    /// Flush caches and drop the connections
    pub fn close(self) -> Result<()> {
        self.clear_prepared_statements()?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ContextType;
    use crate::testing::{stub_storage, StubEmbedder};
    use tempfile::TempDir;

    fn new_memory(path: &str, content: &str) -> NewMemory {
        NewMemory {
            spec_folder: "specs/007-auth".to_string(),
            file_path: path.to_string(),
            title: "OAuth flow".to_string(),
            content: content.to_string(),
            content_hash: crate::parser::content_hash(content),
            trigger_phrases: vec!["oauth".to_string(), "jwt".to_string()],
            context_type: ContextType::Decision,
            importance_tier: ImportanceTier::Important,
            file_mtime_ns: 42,
            related_memories: None,
        }
    }

    #[test]
    fn index_and_get_roundtrip() {
        let (storage, _dir) = stub_storage();
        let embedding = storage
            .provider()
            .embed_document("We use OAuth 2 with JWT access tokens.")
            .unwrap();
        let id = storage
            .index_memory(
                &new_memory("specs/007-auth/memory/oauth.md", "We use OAuth 2 with JWT access tokens."),
                Some(&embedding),
            )
            .unwrap();

        let record = storage.get_memory(id).unwrap().unwrap();
        assert_eq!(record.title, "OAuth flow");
        assert_eq!(record.embedding_status, EmbeddingStatus::Success);
        assert_eq!(record.stability, fsrs::DEFAULT_STABILITY);
        assert_eq!(record.trigger_phrases, vec!["oauth", "jwt"]);

        let by_path = storage
            .get_memory_by_path("specs/007-auth/memory/oauth.md")
            .unwrap()
            .unwrap();
        assert_eq!(by_path.id, id);
    }

    #[test]
    fn duplicate_path_is_rejected() {
        let (storage, _dir) = stub_storage();
        let memory = new_memory("specs/007-auth/memory/oauth.md", "content");
        storage.index_memory(&memory, None).unwrap();
        assert!(storage.index_memory(&memory, None).is_err());
    }

    #[test]
    fn wrong_dimension_is_rejected_without_mutation() {
        let (storage, _dir) = stub_storage();
        let id = storage
            .index_memory(&new_memory("specs/007-auth/memory/a.md", "body"), None)
            .unwrap();

        let bad = vec![0.5f32; 3];
        let err = storage
            .update_memory(id, &MemoryUpdate::default(), Some(&bad), false)
            .unwrap_err();
        assert!(matches!(err, StorageError::DimensionMismatch { .. }));

        let record = storage.get_memory(id).unwrap().unwrap();
        assert_eq!(record.embedding_status, EmbeddingStatus::Pending);
    }

    #[test]
    fn delete_cascades() {
        let (storage, _dir) = stub_storage();
        let embedding = storage.provider().embed_document("body one").unwrap();
        let a = storage
            .index_memory(&new_memory("specs/007-auth/memory/a.md", "body one"), Some(&embedding))
            .unwrap();
        let b = storage
            .index_memory(&new_memory("specs/007-auth/memory/b.md", "body two"), None)
            .unwrap();
        storage
            .insert_edge(a, b, crate::causal::Relation::Supports, 1.0, None)
            .unwrap();

        assert!(storage.delete_memory(a).unwrap());
        assert!(!storage.delete_memory(a).unwrap());

        // Edge cascade
        let edges = storage.edges_for_memory(b).unwrap();
        assert!(edges.is_empty());

        // Vector integrity
        let report = storage.verify_integrity(false).unwrap();
        assert!(report.orphaned_vectors.is_empty());
        assert!(!storage.vector_index().unwrap().contains(a));
    }

    #[test]
    fn update_replaces_fields_and_bumps_review() {
        let (storage, _dir) = stub_storage();
        let id = storage
            .index_memory(&new_memory("specs/007-auth/memory/a.md", "body"), None)
            .unwrap();

        let update = MemoryUpdate {
            title: Some("New title".to_string()),
            importance_tier: Some(ImportanceTier::Critical),
            ..Default::default()
        };
        storage.update_memory(id, &update, None, true).unwrap();

        let record = storage.get_memory(id).unwrap().unwrap();
        assert_eq!(record.title, "New title");
        assert_eq!(record.importance_tier, ImportanceTier::Critical);
        assert_eq!(record.importance_weight, ImportanceTier::Critical.weight());
        assert_eq!(record.review_count, 1);
    }

    #[test]
    fn update_missing_memory_errors() {
        let (storage, _dir) = stub_storage();
        let err = storage
            .update_memory(999, &MemoryUpdate { title: Some("x".into()), ..Default::default() }, None, false)
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[test]
    fn strengthen_on_access_bumps_counters_and_stability() {
        let (storage, _dir) = stub_storage();
        let id = storage
            .index_memory(&new_memory("specs/007-auth/memory/a.md", "body"), None)
            .unwrap();
        let before = storage.get_memory(id).unwrap().unwrap();

        storage.strengthen_on_access(id).unwrap();

        let after = storage.get_memory(id).unwrap().unwrap();
        assert_eq!(after.access_count, before.access_count + 1);
        assert_eq!(after.review_count, before.review_count + 1);
        assert!(after.stability >= before.stability);
        assert!(after.last_accessed.is_some());
    }

    #[test]
    fn scan_cooldown_enforced() {
        let (storage, _dir) = stub_storage();
        assert!(storage.check_scan_cooldown().is_ok());
        storage.record_scan_time().unwrap();
        let err = storage.check_scan_cooldown().unwrap_err();
        match err {
            StorageError::RateLimited { wait_seconds } => {
                assert!(wait_seconds <= DEFAULT_SCAN_COOLDOWN_SECS)
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn dimension_mismatch_on_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.sqlite");
        {
            let provider = Arc::new(StubEmbedder::new(8));
            Storage::open(Some(path.clone()), provider).unwrap();
        }
        let wrong = Arc::new(StubEmbedder::new(16));
        let err = Storage::open(Some(path), wrong).unwrap_err();
        assert!(matches!(
            err,
            StorageError::DimensionMismatch { expected: 8, got: 16 }
        ));
    }

    #[test]
    fn sentinel_bump_triggers_cache_reload() {
        let (storage, _dir) = stub_storage();
        assert!(!storage.check_external_update().unwrap());

        // Simulate an external writer
        let value = (Utc::now().timestamp_millis() + 10_000).to_string();
        std::fs::write(&storage.sentinel_path, value).unwrap();

        assert!(storage.check_external_update().unwrap());
        assert!(!storage.check_external_update().unwrap());
    }

    #[test]
    fn vector_blob_roundtrip() {
        let vector = vec![0.25f32, -1.5, 3.0];
        let bytes = vector_to_bytes(&vector);
        assert_eq!(vector_from_bytes(&bytes), Some(vector));
        assert_eq!(vector_from_bytes(&[1, 2, 3]), None);
    }

    #[test]
    fn integrity_auto_clean_removes_orphans() {
        let (storage, _dir) = stub_storage();
        // Insert a vector row with no parent, bypassing the FK with
        // pragma off on a raw connection
        {
            let writer = storage.writer().unwrap();
            writer.execute_batch("PRAGMA foreign_keys = OFF;").unwrap();
            writer
                .execute(
                    "INSERT INTO memory_vectors (memory_id, embedding, dimensions, created_at)
                     VALUES (999, x'00000000', 1, '2026-01-01T00:00:00Z')",
                    [],
                )
                .unwrap();
            writer.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        }

        let report = storage.verify_integrity(false).unwrap();
        assert_eq!(report.orphaned_vectors, vec![999]);
        assert_eq!(report.cleaned, 0);

        let report = storage.verify_integrity(true).unwrap();
        assert_eq!(report.cleaned, 1);
        let report = storage.verify_integrity(false).unwrap();
        assert!(report.orphaned_vectors.is_empty());
    }

    #[test]
    fn stats_aggregate() {
        let (storage, _dir) = stub_storage();
        storage
            .index_memory(&new_memory("specs/007-auth/memory/a.md", "body a"), None)
            .unwrap();
        let embedding = storage.provider().embed_document("body b").unwrap();
        storage
            .index_memory(&new_memory("specs/007-auth/memory/b.md", "body b"), Some(&embedding))
            .unwrap();

        let stats = storage.stats().unwrap();
        assert_eq!(stats.total_memories, 2);
        assert_eq!(stats.embedded, 1);
        assert_eq!(stats.pending_embeddings, 1);
        assert_eq!(stats.by_folder[0].0, "specs/007-auth");
    }
}
