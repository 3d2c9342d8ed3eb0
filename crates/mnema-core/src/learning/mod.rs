//! Session learning
//!
//! Preflight/postflight epistemic records per `(spec_folder, task_id)`.
//! Postflight computes score deltas and a weighted learning index:
//!
//! ```text
//! learning_index = 0.40 * dK + 0.35 * dU + 0.25 * dC
//! ```
//!
//! where `dU` is *uncertainty reduction* (pre - post). The index is not
//! clamped; negative values report a regression.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::storage::{Result, Storage, StorageError};

// ============================================================================
// TYPES
// ============================================================================

/// Record phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LearningPhase {
    Preflight,
    Complete,
}

impl LearningPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LearningPhase::Preflight => "preflight",
            LearningPhase::Complete => "complete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "preflight" => Some(LearningPhase::Preflight),
            "complete" => Some(LearningPhase::Complete),
            _ => None,
        }
    }
}

/// Scores carried by both phases, each in [0, 100]
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpistemicScores {
    pub knowledge: i64,
    pub uncertainty: i64,
    pub context: i64,
}

impl EpistemicScores {
    pub fn validate(&self) -> std::result::Result<(), String> {
        for (name, value) in [
            ("knowledgeScore", self.knowledge),
            ("uncertaintyScore", self.uncertainty),
            ("contextScore", self.context),
        ] {
            if !(0..=100).contains(&value) {
                return Err(format!("{name} must be in [0, 100], got {value}"));
            }
        }
        Ok(())
    }
}

/// A session-learning row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningRecord {
    pub id: i64,
    pub spec_folder: String,
    pub task_id: String,
    pub phase: LearningPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub pre: Option<EpistemicScores>,
    pub post: Option<EpistemicScores>,
    pub knowledge_gaps: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_knowledge: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_uncertainty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_context: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learning_index: Option<f64>,
    pub gaps_closed: Vec<String>,
    pub new_gaps_discovered: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate stats over a history query
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningSummary {
    pub total_records: usize,
    pub completed: usize,
    pub mean_learning_index: Option<f64>,
    pub min_learning_index: Option<f64>,
    pub max_learning_index: Option<f64>,
    pub mean_delta_knowledge: Option<f64>,
    pub mean_delta_uncertainty: Option<f64>,
    pub mean_delta_context: Option<f64>,
}

/// History query filter
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub spec_folder: Option<String>,
    pub session_id: Option<String>,
    pub only_complete: bool,
    pub limit: usize,
}

// ============================================================================
// PURE COMPUTATION
// ============================================================================

/// Weighted learning index, rounded to two decimals; may be negative
pub fn learning_index(delta_knowledge: f64, delta_uncertainty: f64, delta_context: f64) -> f64 {
    let raw = 0.40 * delta_knowledge + 0.35 * delta_uncertainty + 0.25 * delta_context;
    (raw * 100.0).round() / 100.0
}

/// Qualitative bucket for an index value
pub fn interpret_learning_index(index: f64) -> &'static str {
    if index >= 40.0 {
        "Significant learning session"
    } else if index >= 15.0 {
        "Moderate learning session"
    } else if index >= 5.0 {
        "Incremental learning session"
    } else if index >= 0.0 {
        "Execution-focused session"
    } else {
        "Regression: uncertainty grew faster than knowledge"
    }
}

// ============================================================================
// STORAGE OPERATIONS
// ============================================================================

const LEARNING_COLUMNS: &str = "id, spec_folder, task_id, phase, session_id, \
     pre_knowledge_score, pre_uncertainty_score, pre_context_score, knowledge_gaps, \
     post_knowledge_score, post_uncertainty_score, post_context_score, \
     delta_knowledge, delta_uncertainty, delta_context, learning_index, \
     gaps_closed, new_gaps_discovered, created_at, updated_at";

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<LearningRecord> {
    let phase: String = row.get(3)?;
    let gaps: String = row.get(8)?;
    let gaps_closed: String = row.get(16)?;
    let new_gaps: String = row.get(17)?;

    let scores = |k: Option<i64>, u: Option<i64>, c: Option<i64>| match (k, u, c) {
        (Some(knowledge), Some(uncertainty), Some(context)) => Some(EpistemicScores {
            knowledge,
            uncertainty,
            context,
        }),
        _ => None,
    };

    Ok(LearningRecord {
        id: row.get(0)?,
        spec_folder: row.get(1)?,
        task_id: row.get(2)?,
        phase: LearningPhase::parse(&phase).unwrap_or(LearningPhase::Preflight),
        session_id: row.get(4)?,
        pre: scores(row.get(5)?, row.get(6)?, row.get(7)?),
        post: scores(row.get(9)?, row.get(10)?, row.get(11)?),
        knowledge_gaps: serde_json::from_str(&gaps).unwrap_or_default(),
        delta_knowledge: row.get(12)?,
        delta_uncertainty: row.get(13)?,
        delta_context: row.get(14)?,
        learning_index: row.get(15)?,
        gaps_closed: serde_json::from_str(&gaps_closed).unwrap_or_default(),
        new_gaps_discovered: serde_json::from_str(&new_gaps).unwrap_or_default(),
        created_at: row.get(18)?,
        updated_at: row.get(19)?,
    })
}

impl Storage {
    /// Insert-or-replace the preflight record for a task
    pub fn task_preflight(
        &self,
        spec_folder: &str,
        task_id: &str,
        session_id: Option<&str>,
        scores: EpistemicScores,
        knowledge_gaps: &[String],
    ) -> Result<LearningRecord> {
        scores.validate().map_err(StorageError::InvalidInput)?;
        let now = Utc::now();
        let gaps_json = serde_json::to_string(knowledge_gaps)
            .map_err(|e| StorageError::InvalidInput(e.to_string()))?;

        self.with_tx(|tx| {
            tx.prepare_cached(
                "INSERT INTO session_learning (
                    spec_folder, task_id, phase, session_id,
                    pre_knowledge_score, pre_uncertainty_score, pre_context_score,
                    knowledge_gaps, created_at, updated_at
                ) VALUES (?1, ?2, 'preflight', ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                ON CONFLICT(spec_folder, task_id) DO UPDATE SET
                    phase = 'preflight',
                    session_id = excluded.session_id,
                    pre_knowledge_score = excluded.pre_knowledge_score,
                    pre_uncertainty_score = excluded.pre_uncertainty_score,
                    pre_context_score = excluded.pre_context_score,
                    knowledge_gaps = excluded.knowledge_gaps,
                    post_knowledge_score = NULL,
                    post_uncertainty_score = NULL,
                    post_context_score = NULL,
                    delta_knowledge = NULL,
                    delta_uncertainty = NULL,
                    delta_context = NULL,
                    learning_index = NULL,
                    updated_at = excluded.updated_at",
            )?
            .execute(params![
                spec_folder,
                task_id,
                session_id,
                scores.knowledge,
                scores.uncertainty,
                scores.context,
                gaps_json,
                now,
            ])?;
            Ok(())
        })?;

        self.get_learning_record(spec_folder, task_id)?
            .ok_or_else(|| StorageError::NotFound(format!("{spec_folder}/{task_id}")))
    }

    /// Complete a task: requires a matching preflight, computes deltas
    /// and the learning index, and transitions the phase exactly once
    pub fn task_postflight(
        &self,
        spec_folder: &str,
        task_id: &str,
        scores: EpistemicScores,
        gaps_closed: &[String],
        new_gaps_discovered: &[String],
    ) -> Result<LearningRecord> {
        scores.validate().map_err(StorageError::InvalidInput)?;

        let record = self
            .get_learning_record(spec_folder, task_id)?
            .ok_or_else(|| {
                StorageError::NotFound(format!(
                    "no preflight record for {spec_folder}/{task_id}"
                ))
            })?;
        if record.phase == LearningPhase::Complete {
            return Err(StorageError::InvalidInput(format!(
                "task {spec_folder}/{task_id} is already complete"
            )));
        }
        let pre = record.pre.ok_or_else(|| {
            StorageError::InvalidInput(format!(
                "record for {spec_folder}/{task_id} has no preflight scores"
            ))
        })?;

        let delta_knowledge = (scores.knowledge - pre.knowledge) as f64;
        let delta_uncertainty = (pre.uncertainty - scores.uncertainty) as f64;
        let delta_context = (scores.context - pre.context) as f64;
        let index = learning_index(delta_knowledge, delta_uncertainty, delta_context);

        let now = Utc::now();
        let closed_json = serde_json::to_string(gaps_closed)
            .map_err(|e| StorageError::InvalidInput(e.to_string()))?;
        let new_json = serde_json::to_string(new_gaps_discovered)
            .map_err(|e| StorageError::InvalidInput(e.to_string()))?;

        self.with_tx(|tx| {
            tx.prepare_cached(
                "UPDATE session_learning SET
                    phase = 'complete',
                    post_knowledge_score = ?1,
                    post_uncertainty_score = ?2,
                    post_context_score = ?3,
                    delta_knowledge = ?4,
                    delta_uncertainty = ?5,
                    delta_context = ?6,
                    learning_index = ?7,
                    gaps_closed = ?8,
                    new_gaps_discovered = ?9,
                    updated_at = ?10
                 WHERE spec_folder = ?11 AND task_id = ?12 AND phase = 'preflight'",
            )?
            .execute(params![
                scores.knowledge,
                scores.uncertainty,
                scores.context,
                delta_knowledge,
                delta_uncertainty,
                delta_context,
                index,
                closed_json,
                new_json,
                now,
                spec_folder,
                task_id,
            ])?;
            Ok(())
        })?;

        tracing::info!(spec_folder, task_id, learning_index = index, "task completed");
        self.get_learning_record(spec_folder, task_id)?
            .ok_or_else(|| StorageError::NotFound(format!("{spec_folder}/{task_id}")))
    }

    pub fn get_learning_record(
        &self,
        spec_folder: &str,
        task_id: &str,
    ) -> Result<Option<LearningRecord>> {
        let reader = self.reader()?;
        let record = reader
            .prepare_cached(&format!(
                "SELECT {LEARNING_COLUMNS} FROM session_learning
                 WHERE spec_folder = ?1 AND task_id = ?2"
            ))?
            .query_row([spec_folder, task_id], row_to_record)
            .optional()?;
        Ok(record)
    }

    /// History rows plus optional aggregates
    pub fn learning_history(
        &self,
        filter: &HistoryFilter,
        include_summary: bool,
    ) -> Result<(Vec<LearningRecord>, Option<LearningSummary>)> {
        let reader = self.reader()?;
        let mut sql = format!("SELECT {LEARNING_COLUMNS} FROM session_learning WHERE 1=1");
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(folder) = &filter.spec_folder {
            values.push(Box::new(folder.clone()));
            sql.push_str(&format!(" AND spec_folder = ?{}", values.len()));
        }
        if let Some(session) = &filter.session_id {
            values.push(Box::new(session.clone()));
            sql.push_str(&format!(" AND session_id = ?{}", values.len()));
        }
        if filter.only_complete {
            sql.push_str(" AND phase = 'complete'");
        }
        let limit = if filter.limit == 0 { 100 } else { filter.limit };
        values.push(Box::new(limit as i64));
        sql.push_str(&format!(" ORDER BY updated_at DESC LIMIT ?{}", values.len()));

        let records: Vec<LearningRecord> = {
            let mut stmt = reader.prepare_cached(&sql)?;
            let mapped = stmt.query_map(
                rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())),
                row_to_record,
            )?;
            mapped.collect::<rusqlite::Result<_>>()?
        };

        let summary = include_summary.then(|| {
            let completed: Vec<&LearningRecord> = records
                .iter()
                .filter(|r| r.phase == LearningPhase::Complete)
                .collect();
            let indices: Vec<f64> = completed.iter().filter_map(|r| r.learning_index).collect();
            let mean = |xs: &[f64]| {
                if xs.is_empty() {
                    None
                } else {
                    Some(xs.iter().sum::<f64>() / xs.len() as f64)
                }
            };
            let collect_deltas = |f: fn(&LearningRecord) -> Option<f64>| -> Vec<f64> {
                completed.iter().filter_map(|r| f(r)).collect()
            };
            LearningSummary {
                total_records: records.len(),
                completed: completed.len(),
                mean_learning_index: mean(&indices),
                min_learning_index: indices.iter().copied().reduce(f64::min),
                max_learning_index: indices.iter().copied().reduce(f64::max),
                mean_delta_knowledge: mean(&collect_deltas(|r| r.delta_knowledge)),
                mean_delta_uncertainty: mean(&collect_deltas(|r| r.delta_uncertainty)),
                mean_delta_context: mean(&collect_deltas(|r| r.delta_context)),
            }
        });

        Ok((records, summary))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::stub_storage;

    fn scores(k: i64, u: i64, c: i64) -> EpistemicScores {
        EpistemicScores {
            knowledge: k,
            uncertainty: u,
            context: c,
        }
    }

    #[test]
    fn learning_index_formula() {
        // Spec scenario: pre (40, 60, 50), post (75, 25, 70)
        let index = learning_index(35.0, 35.0, 20.0);
        assert_eq!(index, 31.25);
        assert_eq!(interpret_learning_index(index), "Moderate learning session");
    }

    #[test]
    fn learning_index_rounds_to_two_decimals() {
        let index = learning_index(1.0, 1.0, 1.0);
        assert_eq!(index, 1.0);
        let index = learning_index(0.33, 0.33, 0.34);
        assert_eq!(index, 0.33);
    }

    #[test]
    fn interpretation_buckets() {
        assert_eq!(interpret_learning_index(40.0), "Significant learning session");
        assert_eq!(interpret_learning_index(15.0), "Moderate learning session");
        assert_eq!(interpret_learning_index(5.0), "Incremental learning session");
        assert_eq!(interpret_learning_index(0.0), "Execution-focused session");
        assert!(interpret_learning_index(-3.0).starts_with("Regression"));
    }

    #[test]
    fn preflight_postflight_roundtrip() {
        let (storage, _dir) = stub_storage();
        storage
            .task_preflight("specs/007", "T1", None, scores(40, 60, 50), &[])
            .unwrap();

        let record = storage
            .task_postflight("specs/007", "T1", scores(75, 25, 70), &[], &[])
            .unwrap();
        assert_eq!(record.phase, LearningPhase::Complete);
        assert_eq!(record.delta_knowledge, Some(35.0));
        assert_eq!(record.delta_uncertainty, Some(35.0));
        assert_eq!(record.delta_context, Some(20.0));
        assert_eq!(record.learning_index, Some(31.25));
    }

    #[test]
    fn postflight_without_preflight_fails() {
        let (storage, _dir) = stub_storage();
        let err = storage
            .task_postflight("specs/007", "T9", scores(50, 50, 50), &[], &[])
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[test]
    fn postflight_transitions_exactly_once() {
        let (storage, _dir) = stub_storage();
        storage
            .task_preflight("specs/007", "T1", None, scores(40, 60, 50), &[])
            .unwrap();
        storage
            .task_postflight("specs/007", "T1", scores(75, 25, 70), &[], &[])
            .unwrap();
        let err = storage
            .task_postflight("specs/007", "T1", scores(80, 20, 80), &[], &[])
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidInput(_)));
    }

    #[test]
    fn preflight_replaces_and_resets() {
        let (storage, _dir) = stub_storage();
        storage
            .task_preflight("specs/007", "T1", None, scores(40, 60, 50), &[])
            .unwrap();
        storage
            .task_postflight("specs/007", "T1", scores(75, 25, 70), &[], &[])
            .unwrap();

        // Re-running preflight resets the record to the preflight phase
        let record = storage
            .task_preflight(
                "specs/007",
                "T1",
                Some("session-2"),
                scores(50, 50, 50),
                &["gap a".to_string()],
            )
            .unwrap();
        assert_eq!(record.phase, LearningPhase::Preflight);
        assert_eq!(record.pre.unwrap().knowledge, 50);
        assert!(record.learning_index.is_none());
        assert_eq!(record.knowledge_gaps, vec!["gap a"]);
    }

    #[test]
    fn scores_validated() {
        let (storage, _dir) = stub_storage();
        let err = storage
            .task_preflight("specs/007", "T1", None, scores(101, 50, 50), &[])
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidInput(_)));
    }

    #[test]
    fn negative_learning_index_allowed() {
        let (storage, _dir) = stub_storage();
        storage
            .task_preflight("specs/007", "T1", None, scores(80, 20, 80), &[])
            .unwrap();
        let record = storage
            .task_postflight("specs/007", "T1", scores(60, 60, 70), &[], &[])
            .unwrap();
        // dK = -20, dU = -40, dC = -10 -> 0.4*-20 + 0.35*-40 + 0.25*-10
        assert_eq!(record.learning_index, Some(-24.5));
    }

    #[test]
    fn history_with_summary() {
        let (storage, _dir) = stub_storage();
        for (task, post_k) in [("T1", 75), ("T2", 90)] {
            storage
                .task_preflight("specs/007", task, Some("s1"), scores(40, 60, 50), &[])
                .unwrap();
            storage
                .task_postflight("specs/007", task, scores(post_k, 25, 70), &[], &[])
                .unwrap();
        }
        storage
            .task_preflight("specs/007", "T3", None, scores(10, 90, 10), &[])
            .unwrap();

        let (records, summary) = storage
            .learning_history(
                &HistoryFilter {
                    spec_folder: Some("specs/007".to_string()),
                    ..Default::default()
                },
                true,
            )
            .unwrap();
        assert_eq!(records.len(), 3);
        let summary = summary.unwrap();
        assert_eq!(summary.total_records, 3);
        assert_eq!(summary.completed, 2);
        assert!(summary.mean_learning_index.unwrap() > 31.0);
        assert!(summary.max_learning_index.unwrap() > summary.min_learning_index.unwrap());

        let (only_complete, _) = storage
            .learning_history(
                &HistoryFilter {
                    spec_folder: Some("specs/007".to_string()),
                    only_complete: true,
                    ..Default::default()
                },
                false,
            )
            .unwrap();
        assert_eq!(only_complete.len(), 2);
    }
}
