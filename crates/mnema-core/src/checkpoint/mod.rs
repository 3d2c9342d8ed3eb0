//! Checkpoint manager
//!
//! Named logical snapshots of the store: memory rows with their
//! vectors, causal edges incident to the scoped set, and working-memory
//! entries. Restores are scoped; with `clear_existing` the scoped
//! subset is replaced wholesale, otherwise the merge is best-effort and
//! skips colliding rows.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::attention::WorkingMemoryEntry;
use crate::causal::CausalEdge;
use crate::memory::MemoryRecord;
use crate::storage::{vector_to_bytes, Result, Storage, StorageError};

// ============================================================================
// TYPES
// ============================================================================

/// One memory with its durable vector
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemorySnapshot {
    record: MemoryRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    embedding: Option<Vec<f32>>,
}

/// The opaque checkpoint payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckpointPayload {
    memories: Vec<MemorySnapshot>,
    edges: Vec<CausalEdge>,
    working_memory: Vec<WorkingMemoryEntry>,
}

/// Checkpoint metadata surfaced by `list`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec_folder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub memory_count: usize,
    pub edge_count: usize,
}

/// Result of a restore
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub name: String,
    pub memories_restored: usize,
    pub edges_restored: usize,
    pub working_memory_restored: usize,
    pub cleared_existing: bool,
}

// ============================================================================
// STORAGE OPERATIONS
// ============================================================================

impl Storage {
    /// Snapshot the store (or one folder) under a unique name
    pub fn checkpoint_create(
        &self,
        name: &str,
        spec_folder: Option<&str>,
        metadata: Option<serde_json::Value>,
    ) -> Result<CheckpointInfo> {
        if name.trim().is_empty() {
            return Err(StorageError::InvalidInput(
                "checkpoint name cannot be empty".to_string(),
            ));
        }

        let records = match spec_folder {
            Some(folder) => self.get_memories_by_folder(folder)?,
            None => self.list_memories(None, None, usize::MAX >> 1)?,
        };
        let scoped_ids: HashSet<i64> = records.iter().map(|r| r.id).collect();

        let mut memories = Vec::with_capacity(records.len());
        for record in records {
            let embedding = self.get_vector(record.id)?;
            memories.push(MemorySnapshot { record, embedding });
        }

        let mut edges = Vec::new();
        let mut seen_edges = HashSet::new();
        for id in &scoped_ids {
            for edge in self.edges_for_memory(*id)? {
                if seen_edges.insert(edge.id) {
                    edges.push(edge);
                }
            }
        }

        let working_memory: Vec<WorkingMemoryEntry> = {
            let reader = self.reader()?;
            let mut stmt = reader.prepare_cached(
                "SELECT session_id, memory_id, attention_score, last_turn_activated, last_decay_turn
                 FROM working_memory",
            )?;
            let mapped = stmt.query_map([], |row| {
                Ok(WorkingMemoryEntry {
                    session_id: row.get(0)?,
                    memory_id: row.get(1)?,
                    attention_score: row.get(2)?,
                    last_turn_activated: row.get(3)?,
                    last_decay_turn: row.get(4)?,
                })
            })?;
            mapped
                .collect::<rusqlite::Result<Vec<_>>>()?
                .into_iter()
                .filter(|e| scoped_ids.contains(&e.memory_id))
                .collect()
        };

        let payload = CheckpointPayload {
            memories,
            edges,
            working_memory,
        };
        let payload_json = serde_json::to_string(&payload)
            .map_err(|e| StorageError::InvalidInput(format!("payload serialization: {e}")))?;
        let metadata_json = metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StorageError::InvalidInput(format!("metadata serialization: {e}")))?;
        let now = Utc::now();

        self.with_tx(|tx| {
            let inserted = tx
                .prepare_cached(
                    "INSERT OR IGNORE INTO checkpoints (name, spec_folder, metadata, payload, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )?
                .execute(params![name, spec_folder, metadata_json, payload_json, now])?;
            if inserted == 0 {
                return Err(StorageError::InvalidInput(format!(
                    "checkpoint '{name}' already exists"
                )));
            }
            Ok(())
        })?;

        tracing::info!(
            name,
            memories = payload.memories.len(),
            edges = payload.edges.len(),
            "checkpoint created"
        );
        Ok(CheckpointInfo {
            name: name.to_string(),
            spec_folder: spec_folder.map(str::to_string),
            metadata,
            created_at: now,
            memory_count: payload.memories.len(),
            edge_count: payload.edges.len(),
        })
    }

    /// Auto-checkpoint taken immediately before a bulk destructive op
    pub fn auto_checkpoint_before_cleanup(&self, spec_folder: &str) -> Result<CheckpointInfo> {
        let name = format!("pre-cleanup-{}", Utc::now().format("%Y%m%dT%H%M%S%.3fZ"));
        self.checkpoint_create(
            &name,
            Some(spec_folder),
            Some(serde_json::json!({ "auto": true, "reason": "bulk delete" })),
        )
    }

    /// List checkpoints, newest first
    pub fn checkpoint_list(
        &self,
        spec_folder: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CheckpointInfo>> {
        let reader = self.reader()?;
        let mut sql =
            "SELECT name, spec_folder, metadata, payload, created_at FROM checkpoints".to_string();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(folder) = spec_folder {
            values.push(Box::new(folder.to_string()));
            sql.push_str(" WHERE spec_folder = ?1");
        }
        values.push(Box::new(limit.max(1) as i64));
        sql.push_str(&format!(" ORDER BY created_at DESC LIMIT ?{}", values.len()));

        let mut stmt = reader.prepare_cached(&sql)?;
        let mapped = stmt.query_map(
            rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())),
            |row| {
                let metadata: Option<String> = row.get(2)?;
                let payload: String = row.get(3)?;
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    metadata,
                    payload,
                    row.get::<_, DateTime<Utc>>(4)?,
                ))
            },
        )?;

        let mut infos = Vec::new();
        for row in mapped {
            let (name, folder, metadata, payload, created_at) = row?;
            let parsed: CheckpointPayload = serde_json::from_str(&payload)
                .map_err(|e| StorageError::InvalidInput(format!("corrupt checkpoint payload: {e}")))?;
            infos.push(CheckpointInfo {
                name,
                spec_folder: folder,
                metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
                created_at,
                memory_count: parsed.memories.len(),
                edge_count: parsed.edges.len(),
            });
        }
        Ok(infos)
    }

    /// Restore a checkpoint
    ///
    /// With `clear_existing` the scoped subset (the checkpoint's folder,
    /// or everything for an unscoped checkpoint) is deleted first and
    /// ids are restored verbatim. Without it, rows merge best-effort:
    /// id and path collisions are skipped.
    pub fn checkpoint_restore(&self, name: &str, clear_existing: bool) -> Result<RestoreReport> {
        let (folder, payload_json): (Option<String>, String) = {
            let reader = self.reader()?;
            reader
                .prepare_cached("SELECT spec_folder, payload FROM checkpoints WHERE name = ?1")?
                .query_row([name], |row| Ok((row.get(0)?, row.get(1)?)))
                .optional()?
                .ok_or_else(|| StorageError::NotFound(format!("checkpoint '{name}'")))?
        };
        let payload: CheckpointPayload = serde_json::from_str(&payload_json)
            .map_err(|e| StorageError::InvalidInput(format!("corrupt checkpoint payload: {e}")))?;

        let report = self.with_tx(|tx| {
            if clear_existing {
                match &folder {
                    Some(folder) => {
                        tx.prepare_cached("DELETE FROM memory_index WHERE spec_folder = ?1")?
                            .execute([folder])?;
                    }
                    None => {
                        tx.execute("DELETE FROM memory_index", [])?;
                    }
                }
            }

            let mut memories_restored = 0;
            {
                let mut insert = tx.prepare_cached(
                    "INSERT OR IGNORE INTO memory_index (
                        id, spec_folder, file_path, title, content_hash, content,
                        trigger_phrases, context_type, importance_tier, importance_weight,
                        embedding_status, file_mtime_ns, stability, difficulty, last_review,
                        review_count, access_count, last_accessed, confidence,
                        validation_count, related_memories, created_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
                )?;
                let mut insert_vector = tx.prepare_cached(
                    "INSERT OR REPLACE INTO memory_vectors (memory_id, embedding, dimensions, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;
                for snapshot in &payload.memories {
                    let r = &snapshot.record;
                    let triggers = serde_json::to_string(&r.trigger_phrases)
                        .map_err(|e| StorageError::InvalidInput(e.to_string()))?;
                    let related = r
                        .related_memories
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()
                        .map_err(|e| StorageError::InvalidInput(e.to_string()))?;
                    let inserted = insert.execute(params![
                        r.id,
                        r.spec_folder,
                        r.file_path,
                        r.title,
                        r.content_hash,
                        r.content,
                        triggers,
                        r.context_type.as_str(),
                        r.importance_tier.as_str(),
                        r.importance_weight,
                        r.embedding_status.as_str(),
                        r.file_mtime_ns,
                        r.stability,
                        r.difficulty,
                        r.last_review,
                        r.review_count,
                        r.access_count,
                        r.last_accessed,
                        r.confidence,
                        r.validation_count,
                        related,
                        r.created_at,
                        r.updated_at,
                    ])?;
                    if inserted > 0 {
                        memories_restored += 1;
                        if let Some(embedding) = &snapshot.embedding {
                            insert_vector.execute(params![
                                r.id,
                                vector_to_bytes(embedding),
                                embedding.len() as i64,
                                r.created_at,
                            ])?;
                        }
                    }
                }
            }

            let mut edges_restored = 0;
            {
                let mut insert = tx.prepare_cached(
                    "INSERT OR IGNORE INTO causal_edges (source_id, target_id, relation, strength, evidence, created_at)
                     SELECT ?1, ?2, ?3, ?4, ?5, ?6
                     WHERE EXISTS (SELECT 1 FROM memory_index WHERE id = ?1)
                       AND EXISTS (SELECT 1 FROM memory_index WHERE id = ?2)",
                )?;
                for edge in &payload.edges {
                    edges_restored += insert.execute(params![
                        edge.source_id,
                        edge.target_id,
                        edge.relation.as_str(),
                        edge.strength,
                        edge.evidence,
                        edge.created_at,
                    ])?;
                }
            }

            let mut working_memory_restored = 0;
            {
                let mut insert = tx.prepare_cached(
                    "INSERT OR REPLACE INTO working_memory
                        (session_id, memory_id, attention_score, last_turn_activated, last_decay_turn)
                     SELECT ?1, ?2, ?3, ?4, ?5
                     WHERE EXISTS (SELECT 1 FROM memory_index WHERE id = ?2)",
                )?;
                for entry in &payload.working_memory {
                    working_memory_restored += insert.execute(params![
                        entry.session_id,
                        entry.memory_id,
                        entry.attention_score,
                        entry.last_turn_activated,
                        entry.last_decay_turn,
                    ])?;
                }
            }

            Ok(RestoreReport {
                name: name.to_string(),
                memories_restored,
                edges_restored,
                working_memory_restored,
                cleared_existing: clear_existing,
            })
        })?;

        self.reload_vector_index()?;
        self.invalidate_caches();
        self.bump_sentinel();
        tracing::info!(
            name,
            memories = report.memories_restored,
            edges = report.edges_restored,
            "checkpoint restored"
        );
        Ok(report)
    }

    /// Delete a checkpoint by name; false when absent
    pub fn checkpoint_delete(&self, name: &str) -> Result<bool> {
        let deleted = self
            .writer()?
            .prepare_cached("DELETE FROM checkpoints WHERE name = ?1")?
            .execute([name])?;
        Ok(deleted > 0)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::causal::Relation;
    use crate::memory::{ContextType, ImportanceTier, NewMemory};
    use crate::testing::stub_storage;

    fn seed(storage: &Storage, folder: &str, name: &str) -> i64 {
        let content = format!("content for {name}");
        let embedding = storage.provider().embed_document(&content).unwrap();
        storage
            .index_memory(
                &NewMemory {
                    spec_folder: folder.to_string(),
                    file_path: format!("{folder}/memory/{name}.md"),
                    title: name.to_string(),
                    content,
                    content_hash: crate::parser::content_hash(name),
                    trigger_phrases: vec![name.to_string()],
                    context_type: ContextType::General,
                    importance_tier: ImportanceTier::Normal,
                    file_mtime_ns: 0,
                    related_memories: None,
                },
                Some(&embedding),
            )
            .unwrap()
    }

    #[test]
    fn create_list_delete() {
        let (storage, _dir) = stub_storage();
        seed(&storage, "specs/007-auth", "a");
        seed(&storage, "specs/007-auth", "b");

        let info = storage
            .checkpoint_create("before-cleanup", Some("specs/007-auth"), None)
            .unwrap();
        assert_eq!(info.memory_count, 2);

        let listed = storage.checkpoint_list(None, 10).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "before-cleanup");
        assert_eq!(listed[0].memory_count, 2);

        assert!(storage.checkpoint_delete("before-cleanup").unwrap());
        assert!(!storage.checkpoint_delete("before-cleanup").unwrap());
        assert!(storage.checkpoint_list(None, 10).unwrap().is_empty());
    }

    #[test]
    fn duplicate_name_rejected() {
        let (storage, _dir) = stub_storage();
        storage.checkpoint_create("cp", None, None).unwrap();
        assert!(storage.checkpoint_create("cp", None, None).is_err());
    }

    #[test]
    fn restore_round_trip_after_bulk_delete() {
        let (storage, _dir) = stub_storage();
        let a = seed(&storage, "specs/007-auth", "a");
        let b = seed(&storage, "specs/007-auth", "b");
        storage.insert_edge(a, b, Relation::Supports, 1.0, None).unwrap();
        storage.observe_turn("s1", 1, "a", true).unwrap();

        let before: Vec<i64> = storage
            .get_memories_by_folder("specs/007-auth")
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();

        storage
            .checkpoint_create("before-cleanup", Some("specs/007-auth"), None)
            .unwrap();
        storage.delete_folder("specs/007-auth").unwrap();
        assert!(storage.get_memories_by_folder("specs/007-auth").unwrap().is_empty());

        let report = storage.checkpoint_restore("before-cleanup", true).unwrap();
        assert_eq!(report.memories_restored, 2);
        assert_eq!(report.edges_restored, 1);
        assert_eq!(report.working_memory_restored, 1);

        let after: Vec<i64> = storage
            .get_memories_by_folder("specs/007-auth")
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(before, after);

        // Edge and vector state came back too
        assert_eq!(storage.edges_for_memory(a).unwrap().len(), 1);
        assert!(storage.get_vector(a).unwrap().is_some());
        assert!(storage.vector_index().unwrap().contains(a));
    }

    #[test]
    fn restore_missing_checkpoint_errors() {
        let (storage, _dir) = stub_storage();
        let err = storage.checkpoint_restore("ghost", true).unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[test]
    fn merge_restore_skips_collisions() {
        let (storage, _dir) = stub_storage();
        let a = seed(&storage, "specs/007-auth", "a");
        storage.checkpoint_create("cp", Some("specs/007-auth"), None).unwrap();

        // Memory still present; merge restore must not duplicate it
        let report = storage.checkpoint_restore("cp", false).unwrap();
        assert_eq!(report.memories_restored, 0);
        assert_eq!(
            storage.get_memories_by_folder("specs/007-auth").unwrap().len(),
            1
        );
        assert!(storage.get_memory(a).unwrap().is_some());
    }

    #[test]
    fn folder_scope_limits_snapshot() {
        let (storage, _dir) = stub_storage();
        seed(&storage, "specs/007-auth", "a");
        seed(&storage, "specs/008-billing", "b");

        let info = storage
            .checkpoint_create("auth-only", Some("specs/007-auth"), None)
            .unwrap();
        assert_eq!(info.memory_count, 1);

        // Restoring the auth checkpoint must not clear billing
        storage.delete_folder("specs/007-auth").unwrap();
        storage.checkpoint_restore("auth-only", true).unwrap();
        assert_eq!(
            storage.get_memories_by_folder("specs/008-billing").unwrap().len(),
            1
        );
        assert_eq!(
            storage.get_memories_by_folder("specs/007-auth").unwrap().len(),
            1
        );
    }

    #[test]
    fn auto_checkpoint_name_shape() {
        let (storage, _dir) = stub_storage();
        seed(&storage, "specs/007-auth", "a");
        let info = storage.auto_checkpoint_before_cleanup("specs/007-auth").unwrap();
        assert!(info.name.starts_with("pre-cleanup-"));
        assert_eq!(info.spec_folder.as_deref(), Some("specs/007-auth"));
        assert_eq!(info.metadata.unwrap()["auto"], true);
    }
}
