//! Retrieval engine
//!
//! Vector, lexical, hybrid (RRF), multi-concept, and trigger-phrase
//! search over the store, with tier weighting, temporal decay,
//! constitutional pinning, anchor projection, and the testing-effect
//! callback that strengthens every returned memory.

use crate::embeddings::cosine_similarity;
use crate::memory::{ImportanceTier, MemoryRecord};
use crate::parser;
use crate::search::{
    reciprocal_rank_fusion, sanitize_fts5_query, decay_factor, SearchHit, SearchOptions,
    TriggerMatch,
};

use super::sqlite::{Result, Storage, StorageError};

impl Storage {
    // ========================================================================
    // QUERY EMBEDDING
    // ========================================================================

    /// Embed a query through the LRU cache
    pub fn embed_query_cached(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(hit) = self.query_cache()?.get(text) {
            return Ok(hit.clone());
        }
        let vector = self.provider().embed_query(text)?;
        self.query_cache()?.put(text.to_string(), vector.clone());
        Ok(vector)
    }

    // ========================================================================
    // SEARCH PATHS
    // ========================================================================

    fn passes_filters(&self, record: &MemoryRecord, opts: &SearchOptions) -> bool {
        if let Some(folder) = &opts.spec_folder {
            if &record.spec_folder != folder {
                return false;
            }
        }
        if let Some(tier) = opts.tier {
            if record.importance_tier != tier {
                return false;
            }
        }
        if let Some(ct) = opts.context_type {
            if record.context_type != ct {
                return false;
            }
        }
        true
    }

    fn composite_score(&self, record: &MemoryRecord, similarity: f32, opts: &SearchOptions) -> f64 {
        let mut score = similarity as f64 * record.importance_tier.weight();
        if opts.use_decay {
            let age = record.age_days(chrono::Utc::now());
            score *= decay_factor(age, self.retrieval.decay_tau_days);
        }
        score
    }

    /// Nearest-neighbor search ordered by composite score
    /// (`similarity * tier_weight * decay`)
    pub fn vector_search(&self, query: &[f32], opts: &SearchOptions) -> Result<Vec<SearchHit>> {
        let raw = self
            .vector_index()?
            .search(query, (opts.limit * 8).max(64))?;

        let mut hits = Vec::new();
        for (id, similarity) in raw {
            if similarity < opts.min_similarity {
                continue;
            }
            let Some(record) = self.get_memory(id)? else {
                continue;
            };
            if !self.passes_filters(&record, opts) {
                continue;
            }
            let score = self.composite_score(&record, similarity, opts);
            hits.push(SearchHit {
                memory: record,
                similarity: Some(similarity),
                score,
                pinned: false,
            });
        }
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        if opts.include_contiguity {
            self.apply_contiguity(&mut hits);
        }
        hits.truncate(opts.limit);
        Ok(hits)
    }

    /// Temporal contiguity: memories created near the top hit in time
    /// were likely part of the same working session, so they get a
    /// score bonus that shrinks linearly across the window
    fn apply_contiguity(&self, hits: &mut [SearchHit]) {
        let Some(anchor) = hits.first().map(|h| h.memory.created_at) else {
            return;
        };
        let window = self.retrieval.contiguity_window_hours;
        for hit in hits.iter_mut().skip(1) {
            let gap_hours =
                (hit.memory.created_at - anchor).num_seconds().abs() as f64 / 3600.0;
            if gap_hours <= window {
                hit.score *= 1.0 + self.retrieval.contiguity_bonus * (1.0 - gap_hours / window);
            }
        }
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    }

    /// Lexical search over the FTS5 shadow (title + content)
    pub fn fts_search(&self, query: &str, opts: &SearchOptions) -> Result<Vec<SearchHit>> {
        let sanitized = sanitize_fts5_query(query);
        if sanitized.is_empty() {
            return Ok(Vec::new());
        }

        let ranked: Vec<(i64, f64)> = {
            let reader = self.reader()?;
            let mut stmt = reader.prepare_cached(
                "SELECT rowid, rank FROM memory_fts WHERE memory_fts MATCH ?1 ORDER BY rank LIMIT ?2",
            )?;
            let mapped = stmt.query_map(
                rusqlite::params![sanitized, (opts.limit * 4) as i64],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            mapped.collect::<rusqlite::Result<_>>()?
        };

        let mut hits = Vec::new();
        for (id, rank) in ranked {
            let Some(record) = self.get_memory(id)? else {
                continue;
            };
            if !self.passes_filters(&record, opts) {
                continue;
            }
            // bm25 rank is smaller-is-better; negate for a descending score
            hits.push(SearchHit {
                memory: record,
                similarity: None,
                score: -rank,
                pinned: false,
            });
        }
        hits.truncate(opts.limit);
        Ok(hits)
    }

    /// Hybrid search: RRF fusion of the vector and lexical lists.
    /// Falls back to pure vector search when fusion yields nothing.
    pub fn hybrid_search(
        &self,
        query_vec: Option<&[f32]>,
        query_text: &str,
        opts: &SearchOptions,
    ) -> Result<Vec<SearchHit>> {
        let mut sub_opts = opts.clone();
        sub_opts.limit = (opts.limit * 2).max(10);

        let vector_hits = match query_vec {
            Some(vec) => self.vector_search(vec, &sub_opts).unwrap_or_default(),
            None => Vec::new(),
        };
        let fts_hits = self.fts_search(query_text, &sub_opts).unwrap_or_default();

        let vector_list: Vec<(i64, f32)> = vector_hits
            .iter()
            .map(|h| (h.memory.id, h.score as f32))
            .collect();
        let fts_list: Vec<(i64, f32)> = fts_hits
            .iter()
            .map(|h| (h.memory.id, h.score as f32))
            .collect();

        let fused = reciprocal_rank_fusion(&[&vector_list, &fts_list], self.retrieval.rrf_k);
        if fused.is_empty() {
            return match query_vec {
                Some(vec) => self.vector_search(vec, opts),
                None => Ok(Vec::new()),
            };
        }

        let similarity_by_id: std::collections::HashMap<i64, f32> = vector_hits
            .iter()
            .filter_map(|h| h.similarity.map(|s| (h.memory.id, s)))
            .collect();

        let mut hits = Vec::new();
        for (id, rrf_score) in fused.into_iter().take(opts.limit) {
            let Some(record) = self.get_memory(id)? else {
                continue;
            };
            hits.push(SearchHit {
                memory: record,
                similarity: similarity_by_id.get(&id).copied(),
                score: rrf_score as f64,
                pinned: false,
            });
        }
        Ok(hits)
    }

    /// Stored embedding for a memory, decoded from the durable row
    pub fn get_vector(&self, id: i64) -> Result<Option<Vec<f32>>> {
        use rusqlite::OptionalExtension;
        let blob: Option<Vec<u8>> = {
            let reader = self.reader()?;
            reader
                .prepare_cached("SELECT embedding FROM memory_vectors WHERE memory_id = ?1")?
                .query_row([id], |row| row.get(0))
                .optional()?
        };
        Ok(blob.and_then(|b| super::sqlite::vector_from_bytes(&b)))
    }

    /// Memories relevant to *all* concepts simultaneously
    ///
    /// Requires 2-5 concept embeddings. A row's score is the minimum
    /// similarity across concepts; rows below the per-concept floor
    /// drop out.
    pub fn multi_concept_search(
        &self,
        concepts: &[Vec<f32>],
        opts: &SearchOptions,
    ) -> Result<Vec<SearchHit>> {
        if !(2..=5).contains(&concepts.len()) {
            return Err(StorageError::InvalidInput(format!(
                "multi-concept search needs 2-5 embeddings, got {}",
                concepts.len()
            )));
        }
        let floor = self.retrieval.multi_concept_min_similarity;

        // Union of broad per-concept candidates, then exact min-sim
        // against the stored vectors
        let mut candidate_ids = std::collections::BTreeSet::new();
        for concept in concepts {
            for (id, sim) in self
                .vector_index()?
                .search(concept, (opts.limit * 8).max(64))?
            {
                if sim >= floor {
                    candidate_ids.insert(id);
                }
            }
        }

        let mut hits = Vec::new();
        for id in candidate_ids {
            let Some(stored) = self.get_vector(id)? else {
                continue;
            };
            let min_sim = concepts
                .iter()
                .map(|c| cosine_similarity(c, &stored))
                .fold(f32::INFINITY, f32::min);
            if min_sim < floor {
                continue;
            }
            let Some(record) = self.get_memory(id)? else {
                continue;
            };
            if !self.passes_filters(&record, opts) {
                continue;
            }
            let score = self.composite_score(&record, min_sim, opts);
            hits.push(SearchHit {
                memory: record,
                similarity: Some(min_sim),
                score,
                pinned: false,
            });
        }
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(opts.limit);
        Ok(hits)
    }

    /// Whole-phrase trigger matching against the cached trigger map
    pub fn match_triggers(&self, prompt: &str, limit: usize) -> Result<Vec<TriggerMatch>> {
        self.with_trigger_cache(|cache| cache.matches(prompt, limit))
    }

    // ========================================================================
    // TOP-LEVEL SEARCH
    // ========================================================================

    /// The `memory_search` entry point: hybrid retrieval with
    /// constitutional pinning, anchor projection, and access
    /// strengthening. Falls back to trigger + lexical paths when the
    /// embedding provider is not ready.
    pub fn search_memories(&self, query: &str, opts: &SearchOptions) -> Result<Vec<SearchHit>> {
        let query_vec = if self.provider().is_ready() {
            match self.embed_query_cached(query) {
                Ok(vec) => Some(vec),
                Err(e) => {
                    tracing::warn!("query embedding failed, falling back to lexical: {e}");
                    None
                }
            }
        } else {
            None
        };

        let mut hits = self.hybrid_search(query_vec.as_deref(), query, opts)?;

        if opts.include_constitutional {
            self.pin_constitutional(&mut hits, query_vec.as_deref(), opts)?;
        }

        if !opts.anchors.is_empty() {
            for hit in &mut hits {
                hit.memory.content = hit.memory.content.take().and_then(|content| {
                    let anchors = parser::extract_anchors(&content);
                    parser::anchor_spans(&content, &anchors, &opts.anchors)
                });
            }
        }

        // Testing effect: the store observes every returned access
        for hit in &hits {
            if let Err(e) = self.strengthen_on_access(hit.memory.id) {
                tracing::warn!(id = hit.memory.id, "access strengthening failed: {e}");
            }
        }

        Ok(hits)
    }

    /// Prepend up to five constitutional rows when none ranked
    /// naturally; dedup and re-truncate to the requested limit
    fn pin_constitutional(
        &self,
        hits: &mut Vec<SearchHit>,
        query_vec: Option<&[f32]>,
        opts: &SearchOptions,
    ) -> Result<()> {
        if hits
            .iter()
            .any(|h| h.memory.importance_tier == ImportanceTier::Constitutional)
        {
            return Ok(());
        }

        let mut pinned = Vec::new();
        for record in self.constitutional_rows()? {
            let similarity = match query_vec {
                Some(vec) => match self.get_vector(record.id)? {
                    Some(stored) => cosine_similarity(vec, &stored),
                    None => continue,
                },
                // No vector path available; trigger overlap keeps the
                // row eligible rather than silently dropping the tier
                None => 0.5,
            };
            if similarity < 0.5 {
                continue;
            }
            pinned.push(SearchHit {
                score: self.composite_score(&record, similarity, opts),
                similarity: Some(similarity),
                memory: record,
                pinned: true,
            });
            if pinned.len() == self.retrieval.constitutional_pin_limit {
                break;
            }
        }
        if pinned.is_empty() {
            return Ok(());
        }

        pinned.sort_by(|a, b| b.score.total_cmp(&a.score));
        let existing: std::collections::HashSet<i64> =
            pinned.iter().map(|h| h.memory.id).collect();
        hits.retain(|h| !existing.contains(&h.memory.id));
        let mut combined = pinned;
        combined.append(hits);
        combined.truncate(opts.limit.max(1));
        *hits = combined;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
