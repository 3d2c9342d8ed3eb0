//! Causal graph
//!
//! A small typed edge set between memories, not a general graph
//! database. Edges are associations, never owners: deleting either
//! endpoint cascades to the edge. Traversal is bounded BFS with a
//! visited set; cycles are ignored on revisit.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

use crate::storage::{Result, Storage, StorageError};

/// Hard cap on chain traversal depth
pub const MAX_CHAIN_DEPTH: usize = 10;

// ============================================================================
// TYPES
// ============================================================================

/// Edge relation types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    CausedBy,
    EnabledBy,
    Supersedes,
    Contradicts,
    DerivedFrom,
    Supports,
}

impl Relation {
    pub const ALL: [Relation; 6] = [
        Relation::CausedBy,
        Relation::EnabledBy,
        Relation::Supersedes,
        Relation::Contradicts,
        Relation::DerivedFrom,
        Relation::Supports,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::CausedBy => "caused_by",
            Relation::EnabledBy => "enabled_by",
            Relation::Supersedes => "supersedes",
            Relation::Contradicts => "contradicts",
            Relation::DerivedFrom => "derived_from",
            Relation::Supports => "supports",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "caused_by" => Some(Relation::CausedBy),
            "enabled_by" => Some(Relation::EnabledBy),
            "supersedes" => Some(Relation::Supersedes),
            "contradicts" => Some(Relation::Contradicts),
            "derived_from" => Some(Relation::DerivedFrom),
            "supports" => Some(Relation::Supports),
            _ => None,
        }
    }
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Traversal direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
    #[default]
    Both,
}

impl Direction {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "outgoing" => Some(Direction::Outgoing),
            "incoming" => Some(Direction::Incoming),
            "both" => Some(Direction::Both),
            _ => None,
        }
    }
}

/// A typed edge between two memories
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CausalEdge {
    pub id: i64,
    pub source_id: i64,
    pub target_id: i64,
    pub relation: Relation,
    pub strength: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Options for chain traversal
#[derive(Debug, Clone)]
pub struct ChainOptions {
    pub max_depth: usize,
    pub direction: Direction,
    /// Restrict to these relations; empty means all
    pub relations: Vec<Relation>,
}

impl Default for ChainOptions {
    fn default() -> Self {
        Self {
            max_depth: 3,
            direction: Direction::Both,
            relations: Vec::new(),
        }
    }
}

/// Result of a bounded BFS from one memory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CausalChain {
    pub root: i64,
    pub by_cause: Vec<CausalEdge>,
    pub by_enabled: Vec<CausalEdge>,
    pub by_supersedes: Vec<CausalEdge>,
    pub by_contradicts: Vec<CausalEdge>,
    pub by_derived_from: Vec<CausalEdge>,
    pub by_supports: Vec<CausalEdge>,
    pub all: Vec<CausalEdge>,
    pub max_depth_reached: bool,
}

/// Aggregate graph statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStats {
    pub total_edges: i64,
    pub by_relation: Vec<(String, i64)>,
    /// Share of memories with at least one incident edge
    pub link_coverage_percent: f64,
    pub orphaned_edges: i64,
}

// ============================================================================
// STORAGE OPERATIONS
// ============================================================================

fn row_to_edge(row: &rusqlite::Row<'_>) -> rusqlite::Result<CausalEdge> {
    let relation: String = row.get(3)?;
    Ok(CausalEdge {
        id: row.get(0)?,
        source_id: row.get(1)?,
        target_id: row.get(2)?,
        relation: Relation::parse(&relation).unwrap_or(Relation::Supports),
        strength: row.get(4)?,
        evidence: row.get(5)?,
        created_at: row.get(6)?,
    })
}

const EDGE_COLUMNS: &str = "id, source_id, target_id, relation, strength, evidence, created_at";

impl Storage {
    /// Insert a typed edge; both endpoints must exist and differ
    pub fn insert_edge(
        &self,
        source_id: i64,
        target_id: i64,
        relation: Relation,
        strength: f64,
        evidence: Option<&str>,
    ) -> Result<i64> {
        if source_id == target_id {
            return Err(StorageError::InvalidInput(
                "an edge cannot link a memory to itself".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&strength) {
            return Err(StorageError::InvalidInput(format!(
                "strength must be in [0, 1], got {strength}"
            )));
        }
        for endpoint in [source_id, target_id] {
            if self.get_memory(endpoint)?.is_none() {
                return Err(StorageError::NotFound(format!("memory {endpoint}")));
            }
        }

        let id = self.with_tx(|tx| {
            tx.prepare_cached(
                "INSERT INTO causal_edges (source_id, target_id, relation, strength, evidence, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(source_id, target_id, relation) DO UPDATE SET
                     strength = excluded.strength,
                     evidence = excluded.evidence",
            )?
            .execute(params![
                source_id,
                target_id,
                relation.as_str(),
                strength,
                evidence,
                Utc::now(),
            ])?;
            let id = tx
                .prepare_cached(
                    "SELECT id FROM causal_edges WHERE source_id = ?1 AND target_id = ?2 AND relation = ?3",
                )?
                .query_row(params![source_id, target_id, relation.as_str()], |row| {
                    row.get(0)
                })?;
            Ok(id)
        })?;
        self.bump_sentinel();
        Ok(id)
    }

    /// Delete an edge by id; false when absent
    pub fn delete_edge(&self, edge_id: i64) -> Result<bool> {
        let deleted = self
            .writer()?
            .prepare_cached("DELETE FROM causal_edges WHERE id = ?1")?
            .execute([edge_id])?;
        if deleted > 0 {
            self.bump_sentinel();
        }
        Ok(deleted > 0)
    }

    pub fn get_edge(&self, edge_id: i64) -> Result<Option<CausalEdge>> {
        let reader = self.reader()?;
        let edge = reader
            .prepare_cached(&format!(
                "SELECT {EDGE_COLUMNS} FROM causal_edges WHERE id = ?1"
            ))?
            .query_row([edge_id], row_to_edge)
            .optional()?;
        Ok(edge)
    }

    /// All edges incident to a memory
    pub fn edges_for_memory(&self, memory_id: i64) -> Result<Vec<CausalEdge>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare_cached(&format!(
            "SELECT {EDGE_COLUMNS} FROM causal_edges WHERE source_id = ?1 OR target_id = ?1 ORDER BY id"
        ))?;
        let mapped = stmt.query_map([memory_id], row_to_edge)?;
        Ok(mapped.collect::<rusqlite::Result<_>>()?)
    }

    /// Bounded BFS from `memory_id`, bucketed per relation
    pub fn get_causal_chain(&self, memory_id: i64, opts: &ChainOptions) -> Result<CausalChain> {
        if self.get_memory(memory_id)?.is_none() {
            return Err(StorageError::NotFound(format!("memory {memory_id}")));
        }
        let max_depth = opts.max_depth.clamp(1, MAX_CHAIN_DEPTH);

        let mut chain = CausalChain {
            root: memory_id,
            ..Default::default()
        };
        let mut visited: HashSet<i64> = HashSet::from([memory_id]);
        let mut seen_edges: HashSet<i64> = HashSet::new();
        let mut frontier: VecDeque<(i64, usize)> = VecDeque::from([(memory_id, 0)]);

        while let Some((node, depth)) = frontier.pop_front() {
            if depth == max_depth {
                chain.max_depth_reached = true;
                continue;
            }
            for edge in self.edges_for_memory(node)? {
                let outgoing = edge.source_id == node;
                let follow = match opts.direction {
                    Direction::Outgoing => outgoing,
                    Direction::Incoming => !outgoing,
                    Direction::Both => true,
                };
                if !follow {
                    continue;
                }
                if !opts.relations.is_empty() && !opts.relations.contains(&edge.relation) {
                    continue;
                }
                if !seen_edges.insert(edge.id) {
                    continue;
                }

                let next = if outgoing { edge.target_id } else { edge.source_id };
                match edge.relation {
                    Relation::CausedBy => chain.by_cause.push(edge.clone()),
                    Relation::EnabledBy => chain.by_enabled.push(edge.clone()),
                    Relation::Supersedes => chain.by_supersedes.push(edge.clone()),
                    Relation::Contradicts => chain.by_contradicts.push(edge.clone()),
                    Relation::DerivedFrom => chain.by_derived_from.push(edge.clone()),
                    Relation::Supports => chain.by_supports.push(edge.clone()),
                }
                chain.all.push(edge);

                // Cycles: already-visited nodes are not re-expanded
                if visited.insert(next) {
                    frontier.push_back((next, depth + 1));
                }
            }
        }

        Ok(chain)
    }

    /// Graph-wide statistics
    pub fn causal_stats(&self) -> Result<GraphStats> {
        let reader = self.reader()?;
        let total_edges: i64 =
            reader.query_row("SELECT COUNT(*) FROM causal_edges", [], |row| row.get(0))?;

        let by_relation: Vec<(String, i64)> = {
            let mut stmt = reader.prepare_cached(
                "SELECT relation, COUNT(*) FROM causal_edges GROUP BY relation ORDER BY COUNT(*) DESC",
            )?;
            let mapped = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            mapped.collect::<rusqlite::Result<_>>()?
        };

        let (total_memories, linked): (i64, i64) = reader.query_row(
            "SELECT (SELECT COUNT(*) FROM memory_index),
                    (SELECT COUNT(DISTINCT m.id) FROM memory_index m
                     JOIN causal_edges e ON e.source_id = m.id OR e.target_id = m.id)",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let link_coverage_percent = if total_memories > 0 {
            (linked as f64 / total_memories as f64) * 100.0
        } else {
            0.0
        };

        let orphaned_edges = self.find_orphaned_edges()?.len() as i64;

        Ok(GraphStats {
            total_edges,
            by_relation,
            link_coverage_percent,
            orphaned_edges,
        })
    }

    /// Edges referencing a missing endpoint (possible only after an
    /// external writer bypassed foreign keys)
    pub fn find_orphaned_edges(&self) -> Result<Vec<CausalEdge>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare_cached(&format!(
            "SELECT {EDGE_COLUMNS} FROM causal_edges e
             WHERE NOT EXISTS (SELECT 1 FROM memory_index WHERE id = e.source_id)
                OR NOT EXISTS (SELECT 1 FROM memory_index WHERE id = e.target_id)"
        ))?;
        let mapped = stmt.query_map([], row_to_edge)?;
        Ok(mapped.collect::<rusqlite::Result<_>>()?)
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

    fn seed(storage: &Storage, name: &str) -> i64 {
        storage
            .index_memory(
                &NewMemory {
                    spec_folder: "specs/001".to_string(),
                    file_path: format!("specs/001/memory/{name}.md"),
                    title: name.to_string(),
                    content: format!("content {name}"),
                    content_hash: crate::parser::content_hash(name),
                    trigger_phrases: vec![],
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
    fn insert_and_fetch_edge() {
        let (storage, _dir) = stub_storage();
        let a = seed(&storage, "a");
        let b = seed(&storage, "b");

        let id = storage
            .insert_edge(a, b, Relation::CausedBy, 0.8, Some("observed in review"))
            .unwrap();
        let edge = storage.get_edge(id).unwrap().unwrap();
        assert_eq!(edge.source_id, a);
        assert_eq!(edge.target_id, b);
        assert_eq!(edge.relation, Relation::CausedBy);
        assert_eq!(edge.strength, 0.8);
    }

    #[test]
    fn self_edge_rejected() {
        let (storage, _dir) = stub_storage();
        let a = seed(&storage, "a");
        assert!(storage
            .insert_edge(a, a, Relation::Supports, 1.0, None)
            .is_err());
    }

    #[test]
    fn missing_endpoint_rejected() {
        let (storage, _dir) = stub_storage();
        let a = seed(&storage, "a");
        let err = storage
            .insert_edge(a, 999, Relation::Supports, 1.0, None)
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[test]
    fn duplicate_edge_upserts() {
        let (storage, _dir) = stub_storage();
        let a = seed(&storage, "a");
        let b = seed(&storage, "b");

        let first = storage
            .insert_edge(a, b, Relation::Supports, 0.5, None)
            .unwrap();
        let second = storage
            .insert_edge(a, b, Relation::Supports, 0.9, Some("stronger"))
            .unwrap();
        assert_eq!(first, second);
        let edge = storage.get_edge(first).unwrap().unwrap();
        assert_eq!(edge.strength, 0.9);
    }

    #[test]
    fn invalid_strength_rejected() {
        let (storage, _dir) = stub_storage();
        let a = seed(&storage, "a");
        let b = seed(&storage, "b");
        assert!(storage
            .insert_edge(a, b, Relation::Supports, 1.5, None)
            .is_err());
    }

    #[test]
    fn chain_respects_depth_and_buckets() {
        let (storage, _dir) = stub_storage();
        let a = seed(&storage, "a");
        let b = seed(&storage, "b");
        let c = seed(&storage, "c");
        let d = seed(&storage, "d");

        storage.insert_edge(a, b, Relation::CausedBy, 1.0, None).unwrap();
        storage.insert_edge(b, c, Relation::EnabledBy, 1.0, None).unwrap();
        storage.insert_edge(c, d, Relation::Supports, 1.0, None).unwrap();

        let shallow = storage
            .get_causal_chain(
                a,
                &ChainOptions {
                    max_depth: 1,
                    direction: Direction::Outgoing,
                    relations: vec![],
                },
            )
            .unwrap();
        assert_eq!(shallow.all.len(), 1);
        assert_eq!(shallow.by_cause.len(), 1);
        assert!(shallow.max_depth_reached);

        let deep = storage
            .get_causal_chain(
                a,
                &ChainOptions {
                    max_depth: 5,
                    direction: Direction::Outgoing,
                    relations: vec![],
                },
            )
            .unwrap();
        assert_eq!(deep.all.len(), 3);
        assert_eq!(deep.by_enabled.len(), 1);
        assert_eq!(deep.by_supports.len(), 1);
        assert!(!deep.max_depth_reached);
    }

    #[test]
    fn chain_handles_cycles() {
        let (storage, _dir) = stub_storage();
        let a = seed(&storage, "a");
        let b = seed(&storage, "b");

        storage.insert_edge(a, b, Relation::Supports, 1.0, None).unwrap();
        storage.insert_edge(b, a, Relation::Supports, 1.0, None).unwrap();

        let chain = storage
            .get_causal_chain(a, &ChainOptions::default())
            .unwrap();
        // Both edges found once; traversal terminates
        assert_eq!(chain.all.len(), 2);
    }

    #[test]
    fn chain_filters_relations() {
        let (storage, _dir) = stub_storage();
        let a = seed(&storage, "a");
        let b = seed(&storage, "b");
        let c = seed(&storage, "c");

        storage.insert_edge(a, b, Relation::Supports, 1.0, None).unwrap();
        storage.insert_edge(a, c, Relation::Contradicts, 1.0, None).unwrap();

        let chain = storage
            .get_causal_chain(
                a,
                &ChainOptions {
                    max_depth: 3,
                    direction: Direction::Outgoing,
                    relations: vec![Relation::Contradicts],
                },
            )
            .unwrap();
        assert_eq!(chain.all.len(), 1);
        assert_eq!(chain.by_contradicts.len(), 1);
        assert!(chain.by_supports.is_empty());
    }

    #[test]
    fn chain_direction_incoming() {
        let (storage, _dir) = stub_storage();
        let a = seed(&storage, "a");
        let b = seed(&storage, "b");
        storage.insert_edge(a, b, Relation::DerivedFrom, 1.0, None).unwrap();

        let incoming = storage
            .get_causal_chain(
                b,
                &ChainOptions {
                    max_depth: 2,
                    direction: Direction::Incoming,
                    relations: vec![],
                },
            )
            .unwrap();
        assert_eq!(incoming.all.len(), 1);

        let outgoing = storage
            .get_causal_chain(
                b,
                &ChainOptions {
                    max_depth: 2,
                    direction: Direction::Outgoing,
                    relations: vec![],
                },
            )
            .unwrap();
        assert!(outgoing.all.is_empty());
    }

    #[test]
    fn stats_and_coverage() {
        let (storage, _dir) = stub_storage();
        let a = seed(&storage, "a");
        let b = seed(&storage, "b");
        seed(&storage, "c"); // unlinked

        storage.insert_edge(a, b, Relation::Supports, 1.0, None).unwrap();

        let stats = storage.causal_stats().unwrap();
        assert_eq!(stats.total_edges, 1);
        assert!((stats.link_coverage_percent - 66.666).abs() < 0.1);
        assert_eq!(stats.orphaned_edges, 0);
        assert_eq!(stats.by_relation[0].0, "supports");
    }

    #[test]
    fn delete_edge_works() {
        let (storage, _dir) = stub_storage();
        let a = seed(&storage, "a");
        let b = seed(&storage, "b");
        let id = storage
            .insert_edge(a, b, Relation::Supports, 1.0, None)
            .unwrap();
        assert!(storage.delete_edge(id).unwrap());
        assert!(!storage.delete_edge(id).unwrap());
        assert!(storage.get_edge(id).unwrap().is_none());
    }

    #[test]
    fn relation_roundtrip() {
        for relation in Relation::ALL {
            assert_eq!(Relation::parse(relation.as_str()), Some(relation));
        }
        assert_eq!(Relation::parse("friends_with"), None);
    }
}
