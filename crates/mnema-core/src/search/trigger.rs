//! Trigger-phrase cache and matcher
//!
//! A denormalized map `phrase -> memory ids`, rebuilt from the store
//! whenever its generation falls behind the store's write generation.
//! Matching is whole-phrase presence over a normalized prompt, so the
//! path stays allocation-light and answers well under the 100 ms
//! target for stores of ~10^4 memories.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One matched memory with the phrases that fired
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerMatch {
    pub memory_id: i64,
    pub matched_phrases: Vec<String>,
    pub importance_weight: f64,
}

/// In-RAM trigger map with a build generation
#[derive(Debug, Default)]
pub struct TriggerCache {
    /// normalized phrase -> ids carrying it
    entries: HashMap<String, Vec<i64>>,
    /// id -> importance weight, for ranking
    weights: HashMap<i64, f64>,
    generation: u64,
}

/// Lowercase, replace punctuation with spaces, collapse runs
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

impl TriggerCache {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from `(memory_id, importance_weight, trigger_phrases)` rows
    pub fn build<I>(rows: I, generation: u64) -> Self
    where
        I: IntoIterator<Item = (i64, f64, Vec<String>)>,
    {
        let mut entries: HashMap<String, Vec<i64>> = HashMap::new();
        let mut weights = HashMap::new();
        for (id, weight, phrases) in rows {
            weights.insert(id, weight);
            for phrase in phrases {
                let key = normalize(&phrase);
                if key.is_empty() {
                    continue;
                }
                let ids = entries.entry(key).or_default();
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        Self {
            entries,
            weights,
            generation,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn phrase_count(&self) -> usize {
        self.entries.len()
    }

    /// Whole-phrase matches against `prompt`, ranked by importance
    /// weight then by how many phrases fired
    pub fn matches(&self, prompt: &str, limit: usize) -> Vec<TriggerMatch> {
        let haystack = format!(" {} ", normalize(prompt));
        let mut hits: HashMap<i64, Vec<String>> = HashMap::new();

        for (phrase, ids) in &self.entries {
            if haystack.contains(&format!(" {phrase} ")) {
                for id in ids {
                    hits.entry(*id).or_default().push(phrase.clone());
                }
            }
        }

        let mut matches: Vec<TriggerMatch> = hits
            .into_iter()
            .map(|(memory_id, mut matched_phrases)| {
                matched_phrases.sort();
                TriggerMatch {
                    memory_id,
                    matched_phrases,
                    importance_weight: self.weights.get(&memory_id).copied().unwrap_or(0.0),
                }
            })
            .collect();

        matches.sort_by(|a, b| {
            b.importance_weight
                .total_cmp(&a.importance_weight)
                .then(b.matched_phrases.len().cmp(&a.matched_phrases.len()))
                .then(a.memory_id.cmp(&b.memory_id))
        });
        matches.truncate(limit);
        matches
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> TriggerCache {
        TriggerCache::build(
            vec![
                (1, 0.7, vec!["oauth".to_string(), "jwt".to_string()]),
                (2, 0.5, vec!["session cookies".to_string()]),
                (3, 1.0, vec!["oauth".to_string()]),
            ],
            1,
        )
    }

    #[test]
    fn whole_phrase_matching() {
        let matches = cache().matches("How does OAuth work here?", 10);
        let ids: Vec<i64> = matches.iter().map(|m| m.memory_id).collect();
        assert!(ids.contains(&1));
        assert!(ids.contains(&3));
        assert!(!ids.contains(&2));
    }

    #[test]
    fn substring_does_not_match() {
        // "jwt" must not fire inside "jwtx"
        let matches = cache().matches("the jwtx library", 10);
        assert!(matches.is_empty());
    }

    #[test]
    fn multiword_phrase_matches_across_punctuation() {
        let matches = cache().matches("switch to session-cookies now", 10);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].memory_id, 2);
    }

    #[test]
    fn ranking_prefers_weight_then_phrase_count() {
        let matches = cache().matches("oauth and jwt together", 10);
        // id 3 has weight 1.0, id 1 weight 0.7 with two phrase hits
        assert_eq!(matches[0].memory_id, 3);
        assert_eq!(matches[1].memory_id, 1);
        assert_eq!(matches[1].matched_phrases, vec!["jwt", "oauth"]);
    }

    #[test]
    fn limit_is_respected() {
        let matches = cache().matches("oauth jwt session cookies", 1);
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn case_insensitive() {
        let matches = cache().matches("OAUTH", 10);
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn empty_prompt_no_matches() {
        assert!(cache().matches("", 10).is_empty());
    }

    #[test]
    fn generation_tracked() {
        assert_eq!(cache().generation(), 1);
        assert_eq!(TriggerCache::empty().generation(), 0);
    }
}
