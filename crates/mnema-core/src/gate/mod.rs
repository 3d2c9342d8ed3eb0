//! Prediction-error gate
//!
//! Converts a raw "save this memory" into a disciplined write. The top
//! candidate's similarity selects a band; boundary values go to the
//! higher action:
//!
//! | band            | range              | action                      |
//! |-----------------|--------------------|-----------------------------|
//! | duplicate       | s >= 0.95          | REINFORCE                   |
//! | near-duplicate  | 0.90 <= s < 0.95   | UPDATE, or SUPERSEDE on     |
//! |                 |                    | detected contradiction      |
//! | medium          | 0.70 <= s < 0.90   | CREATE_LINKED               |
//! | low             | 0.50 <= s < 0.70   | CREATE (noted)              |
//! | none            | s < 0.50           | CREATE                      |
//!
//! The contradiction check is deliberately conservative; ambiguous
//! cases resolve to UPDATE.

use serde::{Deserialize, Serialize};

// ============================================================================
// THRESHOLDS
// ============================================================================

pub const DUPLICATE_THRESHOLD: f32 = 0.95;
pub const NEAR_DUPLICATE_THRESHOLD: f32 = 0.90;
pub const RELATED_THRESHOLD: f32 = 0.70;
pub const NOVELTY_THRESHOLD: f32 = 0.50;

// ============================================================================
// TYPES
// ============================================================================

/// Gate decision action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeAction {
    Create,
    CreateLinked,
    Update,
    Reinforce,
    Supersede,
}

impl PeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeAction::Create => "CREATE",
            PeAction::CreateLinked => "CREATE_LINKED",
            PeAction::Update => "UPDATE",
            PeAction::Reinforce => "REINFORCE",
            PeAction::Supersede => "SUPERSEDE",
        }
    }
}

impl std::fmt::Display for PeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An existing memory close enough to the new content to matter
#[derive(Debug, Clone)]
pub struct GateCandidate {
    pub id: i64,
    /// Cosine similarity to the new content, in [0, 1]
    pub similarity: f32,
    pub content: String,
    pub stability: f64,
    pub difficulty: f64,
    pub file_path: String,
}

/// Evidence for a detected contradiction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContradictionSpan {
    /// The directive in the new content
    pub new_span: String,
    /// The conflicting directive in the existing content
    pub existing_span: String,
}

/// The gate's tagged decision
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateDecision {
    pub action: PeAction,
    /// Top candidate the decision was made against
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contradiction: Option<ContradictionSpan>,
    /// Ids to record as related on CREATE_LINKED
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_ids: Vec<i64>,
}

// ============================================================================
// EVALUATION
// ============================================================================

/// Evaluate the band table against the top candidate
pub fn evaluate(new_content: &str, candidates: &[GateCandidate]) -> GateDecision {
    let top = candidates
        .iter()
        .max_by(|a, b| a.similarity.total_cmp(&b.similarity));

    let Some(top) = top else {
        return GateDecision {
            action: PeAction::Create,
            candidate_id: None,
            similarity: None,
            reason: "no existing memories to compare against".to_string(),
            contradiction: None,
            related_ids: Vec::new(),
        };
    };

    let s = top.similarity;

    if s >= DUPLICATE_THRESHOLD {
        return GateDecision {
            action: PeAction::Reinforce,
            candidate_id: Some(top.id),
            similarity: Some(s),
            reason: format!("duplicate of memory {} (similarity {s:.3})", top.id),
            contradiction: None,
            related_ids: Vec::new(),
        };
    }

    if s >= NEAR_DUPLICATE_THRESHOLD {
        if let Some(span) = contradiction_between(new_content, &top.content) {
            return GateDecision {
                action: PeAction::Supersede,
                candidate_id: Some(top.id),
                similarity: Some(s),
                reason: format!(
                    "near-duplicate of memory {} contradicts it: {:?} vs {:?}",
                    top.id, span.new_span, span.existing_span
                ),
                contradiction: Some(span),
                related_ids: Vec::new(),
            };
        }
        return GateDecision {
            action: PeAction::Update,
            candidate_id: Some(top.id),
            similarity: Some(s),
            reason: format!(
                "near-duplicate of memory {} with no contradiction (similarity {s:.3})",
                top.id
            ),
            contradiction: None,
            related_ids: Vec::new(),
        };
    }

    if s >= RELATED_THRESHOLD {
        return GateDecision {
            action: PeAction::CreateLinked,
            candidate_id: Some(top.id),
            similarity: Some(s),
            reason: format!("related to memory {} (similarity {s:.3})", top.id),
            contradiction: None,
            related_ids: vec![top.id],
        };
    }

    if s >= NOVELTY_THRESHOLD {
        return GateDecision {
            action: PeAction::Create,
            candidate_id: Some(top.id),
            similarity: Some(s),
            reason: format!(
                "weakly similar to memory {} (similarity {s:.3}); creating new",
                top.id
            ),
            contradiction: None,
            related_ids: Vec::new(),
        };
    }

    GateDecision {
        action: PeAction::Create,
        candidate_id: None,
        similarity: Some(s),
        reason: format!("novel content (best similarity {s:.3})"),
        contradiction: None,
        related_ids: Vec::new(),
    }
}

// ============================================================================
// CONTRADICTION DETECTION
// ============================================================================

/// A normalized directive extracted from content
#[derive(Debug, Clone, PartialEq)]
enum Directive {
    /// "do not X" / "don't X" / "never X" / "avoid X"
    Negative(String),
    /// "use X" / "prefer X" / "always X"
    Positive(String),
}

impl Directive {
    fn span(&self) -> &str {
        match self {
            Directive::Negative(s) | Directive::Positive(s) => s,
        }
    }
}

/// Extract directives from content, one per line at most
fn extract_directives(content: &str) -> Vec<(Directive, String)> {
    let mut directives = Vec::new();
    for line in content.lines() {
        let normalized = line
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '\'' { c } else { ' ' })
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        if normalized.is_empty() {
            continue;
        }
        let words: Vec<&str> = normalized.split(' ').collect();
        for (i, window) in words.windows(2).enumerate() {
            let subject = |from: usize| words[from..(from + 6).min(words.len())].join(" ");
            match window {
                ["do", "not"] | ["does", "not"] => {
                    if i + 2 < words.len() {
                        directives.push((Directive::Negative(subject(i + 2)), line.trim().to_string()));
                    }
                }
                ["don't", _] | ["never", _] | ["avoid", _] => {
                    directives.push((Directive::Negative(subject(i + 1)), line.trim().to_string()));
                }
                ["use", _] | ["prefer", _] | ["always", _] => {
                    directives.push((Directive::Positive(subject(i + 1)), line.trim().to_string()));
                }
                _ => {}
            }
        }
    }
    directives
}

/// Words too generic to anchor a contradiction on their own
const STOPWORDS: &[&str] = &["use", "the", "and", "for", "with", "not", "are", "this"];

fn overlaps(a: &str, b: &str) -> bool {
    let b_words: Vec<&str> = b.split(' ').collect();
    a.split(' ')
        .any(|w| w.len() >= 3 && !STOPWORDS.contains(&w) && b_words.contains(&w))
}

/// Conservative textual contradiction signal
///
/// Fires on directly negating directive pairs ("use jwt" vs "do not
/// use jwt") and on divergent "use A" vs "use B" directives whose
/// subjects do not overlap while the surrounding content does. Anything
/// ambiguous returns `None`.
pub fn contradiction_between(new_content: &str, existing: &str) -> Option<ContradictionSpan> {
    let new_directives = extract_directives(new_content);
    let old_directives = extract_directives(existing);

    // Negation pair: one side forbids what the other side states
    for (new_directive, new_line) in &new_directives {
        for (old_directive, old_line) in &old_directives {
            let clash = matches!(
                (new_directive, old_directive),
                (Directive::Negative(_), Directive::Positive(_))
                    | (Directive::Positive(_), Directive::Negative(_))
            );
            if clash && overlaps(new_directive.span(), old_directive.span()) {
                return Some(ContradictionSpan {
                    new_span: new_line.clone(),
                    existing_span: old_line.clone(),
                });
            }
        }
    }

    None
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: i64, similarity: f32, content: &str) -> GateCandidate {
        GateCandidate {
            id,
            similarity,
            content: content.to_string(),
            stability: 1.0,
            difficulty: 5.0,
            file_path: format!("specs/001/memory/{id}.md"),
        }
    }

    #[test]
    fn empty_candidates_create() {
        let decision = evaluate("anything", &[]);
        assert_eq!(decision.action, PeAction::Create);
        assert!(decision.candidate_id.is_none());
    }

    #[test]
    fn duplicate_reinforces() {
        let decision = evaluate("same", &[candidate(1, 0.97, "same")]);
        assert_eq!(decision.action, PeAction::Reinforce);
        assert_eq!(decision.candidate_id, Some(1));
    }

    #[test]
    fn boundary_values_go_to_higher_action() {
        // 0.95 -> reinforce, not update
        assert_eq!(
            evaluate("x", &[candidate(1, 0.95, "x")]).action,
            PeAction::Reinforce
        );
        // 0.90 -> update (no contradiction), not create-linked
        assert_eq!(
            evaluate("x", &[candidate(1, 0.90, "x")]).action,
            PeAction::Update
        );
        // 0.70 -> create-linked, not plain create
        assert_eq!(
            evaluate("x", &[candidate(1, 0.70, "x")]).action,
            PeAction::CreateLinked
        );
        // 0.50 -> create with candidate noted
        let low = evaluate("x", &[candidate(1, 0.50, "x")]);
        assert_eq!(low.action, PeAction::Create);
        assert_eq!(low.candidate_id, Some(1));
        // just below 0.50 -> plain create
        let none = evaluate("x", &[candidate(1, 0.499, "x")]);
        assert_eq!(none.action, PeAction::Create);
        assert!(none.candidate_id.is_none());
    }

    #[test]
    fn near_duplicate_without_contradiction_updates() {
        let decision = evaluate(
            "We use OAuth 2 with JWT access tokens and a refresh flow.",
            &[candidate(3, 0.92, "We use OAuth 2 with JWT access tokens.")],
        );
        assert_eq!(decision.action, PeAction::Update);
        assert!(decision.contradiction.is_none());
    }

    #[test]
    fn near_duplicate_with_contradiction_supersedes() {
        let decision = evaluate(
            "Do not use JWT; use opaque session cookies.",
            &[candidate(3, 0.91, "Use JWT access tokens for auth.")],
        );
        assert_eq!(decision.action, PeAction::Supersede);
        assert!(decision.contradiction.is_some());
    }

    #[test]
    fn medium_band_links() {
        let decision = evaluate("new stuff", &[candidate(7, 0.8, "older stuff")]);
        assert_eq!(decision.action, PeAction::CreateLinked);
        assert_eq!(decision.related_ids, vec![7]);
    }

    #[test]
    fn picks_highest_similarity_candidate() {
        let decision = evaluate(
            "x",
            &[
                candidate(1, 0.6, "a"),
                candidate(2, 0.96, "b"),
                candidate(3, 0.8, "c"),
            ],
        );
        assert_eq!(decision.action, PeAction::Reinforce);
        assert_eq!(decision.candidate_id, Some(2));
    }

    #[test]
    fn contradiction_negation_pair() {
        let span = contradiction_between(
            "Never store tokens in local storage.",
            "Always store tokens in local storage for speed.",
        );
        assert!(span.is_some());
    }

    #[test]
    fn contradiction_requires_overlap() {
        // Negative and positive directives about unrelated subjects
        let span = contradiction_between(
            "Do not block the event loop.",
            "Use postgres for persistence.",
        );
        assert!(span.is_none());
    }

    #[test]
    fn ambiguous_text_is_not_contradiction() {
        let span = contradiction_between(
            "The retry budget is three attempts.",
            "Retries use exponential backoff.",
        );
        assert!(span.is_none());
    }

    #[test]
    fn dont_variant_detected() {
        let span = contradiction_between(
            "Don't use eval in templates.",
            "Use eval in templates when sandboxed.",
        );
        assert!(span.is_some());
    }

    #[test]
    fn action_strings_are_stable() {
        assert_eq!(PeAction::CreateLinked.as_str(), "CREATE_LINKED");
        assert_eq!(PeAction::Reinforce.to_string(), "REINFORCE");
    }
}
