//! Database migrations
//!
//! Applied idempotently at open; each migration runs in its own
//! transaction. A failed migration aborts the open - the process never
//! serves requests over a half-migrated store.

use rusqlite::Connection;

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub up: &'static str,
}

/// Migration definitions, oldest first
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Core schema: memory index, vectors, FTS shadow, causal edges",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Working memory and session learning",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "Checkpoints, conflict audit log, config store",
        up: MIGRATION_V3_UP,
    },
];

const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS memory_index (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    spec_folder TEXT NOT NULL,
    file_path TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    content TEXT,
    trigger_phrases TEXT NOT NULL DEFAULT '[]',
    context_type TEXT NOT NULL DEFAULT 'general',
    importance_tier TEXT NOT NULL DEFAULT 'normal',
    importance_weight REAL NOT NULL DEFAULT 0.5,
    embedding_status TEXT NOT NULL DEFAULT 'pending',
    file_mtime_ns INTEGER NOT NULL DEFAULT 0,

    -- FSRS state
    stability REAL NOT NULL DEFAULT 1.0,
    difficulty REAL NOT NULL DEFAULT 5.0,
    last_review TEXT NOT NULL,
    review_count INTEGER NOT NULL DEFAULT 0,

    -- Access tracking
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed TEXT,
    confidence REAL NOT NULL DEFAULT 0.5,
    validation_count INTEGER NOT NULL DEFAULT 0,

    related_memories TEXT,

    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_memory_folder ON memory_index(spec_folder);
CREATE INDEX IF NOT EXISTS idx_memory_tier ON memory_index(importance_tier);
CREATE INDEX IF NOT EXISTS idx_memory_hash ON memory_index(content_hash);

-- Durable vector storage; the HNSW index is rebuilt from here at open
CREATE TABLE IF NOT EXISTS memory_vectors (
    memory_id INTEGER PRIMARY KEY REFERENCES memory_index(id) ON DELETE CASCADE,
    embedding BLOB NOT NULL,
    dimensions INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

-- FTS5 shadow over title + content
CREATE VIRTUAL TABLE IF NOT EXISTS memory_fts USING fts5(
    title,
    content,
    content='memory_index',
    content_rowid='id',
    tokenize='porter unicode61'
);

CREATE TRIGGER IF NOT EXISTS memory_fts_ai AFTER INSERT ON memory_index BEGIN
    INSERT INTO memory_fts(rowid, title, content)
    VALUES (NEW.id, NEW.title, COALESCE(NEW.content, ''));
END;

CREATE TRIGGER IF NOT EXISTS memory_fts_ad AFTER DELETE ON memory_index BEGIN
    INSERT INTO memory_fts(memory_fts, rowid, title, content)
    VALUES ('delete', OLD.id, OLD.title, COALESCE(OLD.content, ''));
END;

CREATE TRIGGER IF NOT EXISTS memory_fts_au AFTER UPDATE ON memory_index BEGIN
    INSERT INTO memory_fts(memory_fts, rowid, title, content)
    VALUES ('delete', OLD.id, OLD.title, COALESCE(OLD.content, ''));
    INSERT INTO memory_fts(rowid, title, content)
    VALUES (NEW.id, NEW.title, COALESCE(NEW.content, ''));
END;

-- Typed causal edges between memories
CREATE TABLE IF NOT EXISTS causal_edges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id INTEGER NOT NULL REFERENCES memory_index(id) ON DELETE CASCADE,
    target_id INTEGER NOT NULL REFERENCES memory_index(id) ON DELETE CASCADE,
    relation TEXT NOT NULL,
    strength REAL NOT NULL DEFAULT 1.0,
    evidence TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(source_id, target_id, relation),
    CHECK(source_id != target_id)
);

CREATE INDEX IF NOT EXISTS idx_edges_source ON causal_edges(source_id);
CREATE INDEX IF NOT EXISTS idx_edges_target ON causal_edges(target_id);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);
"#;

const MIGRATION_V2_UP: &str = r#"
-- Per-session attention scores
CREATE TABLE IF NOT EXISTS working_memory (
    session_id TEXT NOT NULL,
    memory_id INTEGER NOT NULL REFERENCES memory_index(id) ON DELETE CASCADE,
    attention_score REAL NOT NULL DEFAULT 0.0,
    last_turn_activated INTEGER NOT NULL DEFAULT 0,
    last_decay_turn INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (session_id, memory_id)
);

CREATE INDEX IF NOT EXISTS idx_wm_session ON working_memory(session_id);

-- Preflight/postflight epistemic records
CREATE TABLE IF NOT EXISTS session_learning (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    spec_folder TEXT NOT NULL,
    task_id TEXT NOT NULL,
    phase TEXT NOT NULL DEFAULT 'preflight',
    session_id TEXT,
    pre_knowledge_score INTEGER,
    pre_uncertainty_score INTEGER,
    pre_context_score INTEGER,
    knowledge_gaps TEXT NOT NULL DEFAULT '[]',
    post_knowledge_score INTEGER,
    post_uncertainty_score INTEGER,
    post_context_score INTEGER,
    delta_knowledge REAL,
    delta_uncertainty REAL,
    delta_context REAL,
    learning_index REAL,
    gaps_closed TEXT NOT NULL DEFAULT '[]',
    new_gaps_discovered TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(spec_folder, task_id)
);
"#;

const MIGRATION_V3_UP: &str = r#"
-- Named logical snapshots
CREATE TABLE IF NOT EXISTS checkpoints (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    spec_folder TEXT,
    metadata TEXT,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Append-only prediction-error decision log
CREATE TABLE IF NOT EXISTS memory_conflicts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    new_memory_hash TEXT NOT NULL,
    existing_memory_id INTEGER,
    similarity_score REAL,
    action TEXT NOT NULL,
    contradiction_detected INTEGER NOT NULL DEFAULT 0,
    notes TEXT,
    spec_folder TEXT,
    created_at TEXT NOT NULL
);

-- Cross-connection durable state
CREATE TABLE IF NOT EXISTS config (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Apply all pending migrations; each one runs in a transaction
pub fn apply_migrations(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        tracing::info!(
            version = migration.version,
            "applying migration: {}",
            migration.description
        );
        let tx = conn.transaction()?;
        tx.execute_batch(migration.up)?;
        tx.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![migration.version, chrono::Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
    }

    Ok(())
}

/// Latest schema version shipped with this build
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

// ============================================================================
// TESTS
// ============================================================================
