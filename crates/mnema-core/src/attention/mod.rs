//! Working memory and attention
//!
//! Per-session activation scores over memories. Each turn runs the
//! same pipeline: decay, trigger match, activation, co-activation
//! spread, tier classification, tiered projection. State persists in
//! the `working_memory` table; nothing else survives between sessions.

use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::causal::Relation;
use crate::parser;
use crate::storage::{Result, Storage};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Score added to related memories when a neighbor activates
pub const CO_ACTIVATION_BOOST: f64 = 0.35;

/// Soft cap on per-session entries; overflow evicts lowest-score rows
pub const SESSION_SOFT_CAP: usize = 200;

/// HOT tier floor
pub const HOT_THRESHOLD: f64 = 0.75;

/// WARM tier floor
pub const WARM_THRESHOLD: f64 = 0.35;

/// Power-law decay exponent per elapsed turn
const DECAY_EXPONENT: f64 = -0.5;

// ============================================================================
// TYPES
// ============================================================================

/// Attention tier of a working-memory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttentionTier {
    Hot,
    Warm,
    Cold,
}

/// Classify an attention score
pub fn classify(score: f64) -> AttentionTier {
    if score >= HOT_THRESHOLD {
        AttentionTier::Hot
    } else if score >= WARM_THRESHOLD {
        AttentionTier::Warm
    } else {
        AttentionTier::Cold
    }
}

/// Power-law attention decay across `turns_elapsed` turns
pub fn decay_multiplier(turns_elapsed: i64) -> f64 {
    if turns_elapsed <= 0 {
        return 1.0;
    }
    (1.0 + turns_elapsed as f64).powf(DECAY_EXPONENT)
}

/// One persisted `(session, memory)` attention row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingMemoryEntry {
    pub session_id: String,
    pub memory_id: i64,
    pub attention_score: f64,
    pub last_turn_activated: i64,
    pub last_decay_turn: i64,
}

/// Tiered content projection of one entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryProjection {
    pub memory_id: i64,
    pub title: String,
    pub attention_score: f64,
    pub tier: AttentionTier,
    /// Full content (HOT only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Title + top anchor ids (WARM only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Result of one turn of the attention pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutcome {
    pub turn: i64,
    pub activated: Vec<i64>,
    pub co_activated: Vec<i64>,
    pub hot: Vec<MemoryProjection>,
    pub warm: Vec<MemoryProjection>,
    /// COLD entries stay tracked but are suppressed from the return
    pub cold_tracked: usize,
}

// ============================================================================
// STORAGE OPERATIONS
// ============================================================================

impl Storage {
    /// Run the attention pipeline for one turn of a session
    ///
    /// `use_decay = false` (resume mode) skips step one and leaves
    /// prior activations untouched.
    pub fn observe_turn(
        &self,
        session_id: &str,
        turn: i64,
        prompt: &str,
        use_decay: bool,
    ) -> Result<TurnOutcome> {
        // 1. Decay every entry by elapsed turns
        if use_decay {
            let entries = self.working_memory_entries(session_id)?;
            self.with_tx(|tx| {
                let mut stmt = tx.prepare_cached(
                    "UPDATE working_memory SET attention_score = ?1, last_decay_turn = ?2
                     WHERE session_id = ?3 AND memory_id = ?4",
                )?;
                for entry in &entries {
                    let elapsed = turn - entry.last_decay_turn;
                    if elapsed <= 0 {
                        continue;
                    }
                    let decayed = (entry.attention_score * decay_multiplier(elapsed)).max(0.0);
                    stmt.execute(params![decayed, turn, session_id, entry.memory_id])?;
                }
                Ok(())
            })?;
        }

        // 2. Trigger match over the prompt
        let matches = self.match_triggers(prompt, 20)?;
        let activated: Vec<i64> = matches.iter().map(|m| m.memory_id).collect();

        // 3. Activate matched memories at full attention
        self.with_tx(|tx| {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO working_memory (session_id, memory_id, attention_score, last_turn_activated, last_decay_turn)
                 VALUES (?1, ?2, 1.0, ?3, ?3)
                 ON CONFLICT(session_id, memory_id) DO UPDATE SET
                     attention_score = 1.0,
                     last_turn_activated = ?3,
                     last_decay_turn = ?3",
            )?;
            for id in &activated {
                stmt.execute(params![session_id, id, turn])?;
            }
            Ok(())
        })?;

        // 4. Co-activation: depth-1 spread over related_memories and
        //    enabled_by / derived_from edges
        let mut related: BTreeSet<i64> = BTreeSet::new();
        for id in &activated {
            if let Some(record) = self.get_memory(*id)? {
                for rel in record.related_memories.unwrap_or_default() {
                    related.insert(rel);
                }
            }
            for edge in self.edges_for_memory(*id)? {
                if matches!(edge.relation, Relation::EnabledBy | Relation::DerivedFrom) {
                    related.insert(if edge.source_id == *id {
                        edge.target_id
                    } else {
                        edge.source_id
                    });
                }
            }
        }
        for id in &activated {
            related.remove(id);
        }

        let co_activated: Vec<i64> = related.into_iter().collect();
        self.with_tx(|tx| {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO working_memory (session_id, memory_id, attention_score, last_turn_activated, last_decay_turn)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(session_id, memory_id) DO UPDATE SET
                     attention_score = MIN(1.0, attention_score + ?3),
                     last_decay_turn = ?4",
            )?;
            for id in &co_activated {
                stmt.execute(params![session_id, id, CO_ACTIVATION_BOOST, turn])?;
            }
            Ok(())
        })?;

        // 5. Evict past the soft cap, lowest score first
        self.evict_overflow(session_id)?;

        // 6. Classify and project
        let entries = self.working_memory_entries(session_id)?;
        let mut hot = Vec::new();
        let mut warm = Vec::new();
        let mut cold_tracked = 0;
        for entry in &entries {
            match classify(entry.attention_score) {
                AttentionTier::Hot | AttentionTier::Warm => {
                    let Some(record) = self.get_memory(entry.memory_id)? else {
                        continue;
                    };
                    let tier = classify(entry.attention_score);
                    let projection = if tier == AttentionTier::Hot {
                        MemoryProjection {
                            memory_id: entry.memory_id,
                            title: record.title.clone(),
                            attention_score: entry.attention_score,
                            tier,
                            content: record.content,
                            summary: None,
                        }
                    } else {
                        let anchors: Vec<String> = record
                            .content
                            .as_deref()
                            .map(|c| {
                                parser::extract_anchors(c)
                                    .into_iter()
                                    .map(|a| a.id)
                                    .take(5)
                                    .collect()
                            })
                            .unwrap_or_default();
                        let summary = if anchors.is_empty() {
                            record.title.clone()
                        } else {
                            format!("{} [{}]", record.title, anchors.join(", "))
                        };
                        MemoryProjection {
                            memory_id: entry.memory_id,
                            title: record.title.clone(),
                            attention_score: entry.attention_score,
                            tier,
                            content: None,
                            summary: Some(summary),
                        }
                    };
                    if tier == AttentionTier::Hot {
                        hot.push(projection);
                    } else {
                        warm.push(projection);
                    }
                }
                AttentionTier::Cold => cold_tracked += 1,
            }
        }
        hot.sort_by(|a, b| b.attention_score.total_cmp(&a.attention_score));
        warm.sort_by(|a, b| b.attention_score.total_cmp(&a.attention_score));

        tracing::debug!(
            session_id,
            turn,
            activated = activated.len(),
            co_activated = co_activated.len(),
            hot = hot.len(),
            warm = warm.len(),
            "attention turn observed"
        );

        Ok(TurnOutcome {
            turn,
            activated,
            co_activated,
            hot,
            warm,
            cold_tracked,
        })
    }

    /// All entries for a session, highest attention first
    pub fn working_memory_entries(&self, session_id: &str) -> Result<Vec<WorkingMemoryEntry>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare_cached(
            "SELECT session_id, memory_id, attention_score, last_turn_activated, last_decay_turn
             FROM working_memory WHERE session_id = ?1 ORDER BY attention_score DESC, memory_id",
        )?;
        let mapped = stmt.query_map([session_id], |row| {
            Ok(WorkingMemoryEntry {
                session_id: row.get(0)?,
                memory_id: row.get(1)?,
                attention_score: row.get(2)?,
                last_turn_activated: row.get(3)?,
                last_decay_turn: row.get(4)?,
            })
        })?;
        Ok(mapped.collect::<rusqlite::Result<_>>()?)
    }

    /// Drop a session's working memory; returns rows removed
    pub fn clear_session(&self, session_id: &str) -> Result<usize> {
        let count = self
            .writer()?
            .prepare_cached("DELETE FROM working_memory WHERE session_id = ?1")?
            .execute([session_id])?;
        Ok(count)
    }

    fn evict_overflow(&self, session_id: &str) -> Result<()> {
        let count: i64 = self.reader()?.query_row(
            "SELECT COUNT(*) FROM working_memory WHERE session_id = ?1",
            [session_id],
            |row| row.get(0),
        )?;
        let overflow = count as usize;
        if overflow <= SESSION_SOFT_CAP {
            return Ok(());
        }
        let excess = overflow - SESSION_SOFT_CAP;
        self.writer()?
            .prepare_cached(
                "DELETE FROM working_memory WHERE rowid IN (
                     SELECT rowid FROM working_memory WHERE session_id = ?1
                     ORDER BY attention_score ASC, memory_id LIMIT ?2
                 )",
            )?
            .execute(params![session_id, excess as i64])?;
        tracing::debug!(session_id, evicted = excess, "working memory evicted overflow");
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ContextType, ImportanceTier, NewMemory};
    use crate::testing::stub_storage;

    fn seed(storage: &Storage, name: &str, triggers: &[&str]) -> i64 {
        storage
            .index_memory(
                &NewMemory {
                    spec_folder: "specs/001".to_string(),
                    file_path: format!("specs/001/memory/{name}.md"),
                    title: name.to_string(),
                    content: format!("content for {name}"),
                    content_hash: crate::parser::content_hash(name),
                    trigger_phrases: triggers.iter().map(|s| s.to_string()).collect(),
                    context_type: ContextType::General,
                    importance_tier: ImportanceTier::Normal,
                    file_mtime_ns: 0,
                    related_memories: None,
                },
                None,
            )
            .unwrap()
    }

    #[test]
    fn classify_thresholds() {
        assert_eq!(classify(0.75), AttentionTier::Hot);
        assert_eq!(classify(0.74), AttentionTier::Warm);
        assert_eq!(classify(0.35), AttentionTier::Warm);
        assert_eq!(classify(0.34), AttentionTier::Cold);
    }

    #[test]
    fn decay_multiplier_shape() {
        assert_eq!(decay_multiplier(0), 1.0);
        assert!(decay_multiplier(1) < 1.0);
        assert!(decay_multiplier(4) < decay_multiplier(1));
        // Power law, not exponential: long tails stay positive
        assert!(decay_multiplier(100) > 0.0);
    }

    #[test]
    fn activation_sets_full_attention() {
        let (storage, _dir) = stub_storage();
        let id = seed(&storage, "oauth", &["oauth"]);

        let outcome = storage.observe_turn("s1", 1, "tell me about oauth", true).unwrap();
        assert_eq!(outcome.activated, vec![id]);
        assert_eq!(outcome.hot.len(), 1);
        assert_eq!(outcome.hot[0].memory_id, id);
        assert!(outcome.hot[0].content.is_some());
    }

    #[test]
    fn decay_moves_entries_to_warm_then_cold() {
        let (storage, _dir) = stub_storage();
        let id = seed(&storage, "oauth", &["oauth"]);

        storage.observe_turn("s1", 1, "oauth please", true).unwrap();

        // Later turns with unrelated prompts decay the entry
        let outcome = storage.observe_turn("s1", 4, "nothing relevant", true).unwrap();
        assert!(outcome.hot.is_empty());
        assert_eq!(outcome.warm.len(), 1);
        assert_eq!(outcome.warm[0].memory_id, id);
        assert!(outcome.warm[0].content.is_none());
        assert!(outcome.warm[0].summary.is_some());

        let outcome = storage.observe_turn("s1", 30, "still unrelated", true).unwrap();
        assert!(outcome.warm.is_empty());
        assert_eq!(outcome.cold_tracked, 1);

        // Entry stays tracked while cold
        assert_eq!(storage.working_memory_entries("s1").unwrap().len(), 1);
    }

    #[test]
    fn reactivation_restores_full_attention() {
        let (storage, _dir) = stub_storage();
        seed(&storage, "oauth", &["oauth"]);

        storage.observe_turn("s1", 1, "oauth", true).unwrap();
        storage.observe_turn("s1", 10, "unrelated", true).unwrap();
        let outcome = storage.observe_turn("s1", 11, "oauth again", true).unwrap();
        assert_eq!(outcome.hot.len(), 1);
        assert_eq!(outcome.hot[0].attention_score, 1.0);
    }

    #[test]
    fn co_activation_spreads_to_related() {
        let (storage, _dir) = stub_storage();
        let trigger_id = seed(&storage, "oauth", &["oauth"]);
        let enabled = seed(&storage, "tokens", &[]);
        let unrelated = seed(&storage, "builds", &[]);
        storage
            .insert_edge(trigger_id, enabled, Relation::EnabledBy, 1.0, None)
            .unwrap();

        let outcome = storage.observe_turn("s1", 1, "oauth", true).unwrap();
        assert_eq!(outcome.co_activated, vec![enabled]);

        let entries = storage.working_memory_entries("s1").unwrap();
        let enabled_entry = entries.iter().find(|e| e.memory_id == enabled).unwrap();
        assert!((enabled_entry.attention_score - CO_ACTIVATION_BOOST).abs() < 1e-9);
        assert!(!entries.iter().any(|e| e.memory_id == unrelated));
    }

    #[test]
    fn co_activation_score_clamps_at_one() {
        let (storage, _dir) = stub_storage();
        let a = seed(&storage, "oauth", &["oauth"]);
        let b = seed(&storage, "tokens", &["tokens"]);
        storage.insert_edge(a, b, Relation::DerivedFrom, 1.0, None).unwrap();

        // b activates directly AND receives co-activation
        let outcome = storage.observe_turn("s1", 1, "oauth tokens", true).unwrap();
        assert!(outcome.co_activated.is_empty()); // both directly activated

        let entries = storage.working_memory_entries("s1").unwrap();
        for entry in entries {
            assert!(entry.attention_score <= 1.0);
        }
    }

    #[test]
    fn resume_mode_skips_decay() {
        let (storage, _dir) = stub_storage();
        seed(&storage, "oauth", &["oauth"]);

        storage.observe_turn("s1", 1, "oauth", true).unwrap();
        let outcome = storage.observe_turn("s1", 20, "unrelated", false).unwrap();
        assert_eq!(outcome.hot.len(), 1);
    }

    #[test]
    fn sessions_are_isolated() {
        let (storage, _dir) = stub_storage();
        seed(&storage, "oauth", &["oauth"]);

        storage.observe_turn("s1", 1, "oauth", true).unwrap();
        let outcome = storage.observe_turn("s2", 1, "unrelated", true).unwrap();
        assert!(outcome.hot.is_empty());
        assert_eq!(storage.working_memory_entries("s2").unwrap().len(), 0);

        assert_eq!(storage.clear_session("s1").unwrap(), 1);
        assert_eq!(storage.working_memory_entries("s1").unwrap().len(), 0);
    }

    #[test]
    fn overflow_evicts_lowest_scores() {
        let (storage, _dir) = stub_storage();
        // Seed beyond the cap with distinct triggers, activating each
        // on its own turn so scores spread
        let mut ids = Vec::new();
        for i in 0..(SESSION_SOFT_CAP + 20) {
            ids.push(seed(&storage, &format!("m{i}"), &[&format!("trigger{i}")]));
        }
        for (i, _) in ids.iter().enumerate() {
            storage
                .observe_turn("s1", i as i64 + 1, &format!("trigger{i}"), true)
                .unwrap();
        }

        let entries = storage.working_memory_entries("s1").unwrap();
        assert!(entries.len() <= SESSION_SOFT_CAP);
        // The most recently activated memory survived
        assert!(entries.iter().any(|e| e.memory_id == *ids.last().unwrap()));
    }
}
