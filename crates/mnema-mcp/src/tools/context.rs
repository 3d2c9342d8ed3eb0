//! memory_context
//!
//! Intent-aware routing. Classifies the prompt when `mode=auto`, then
//! drives the matching retrieval path with a mode-specific token
//! budget and anchor set. With a `sessionId` the per-session
//! working-memory pipeline (decay, activation, co-activation,
//! projection) runs for the turn. Resume mode pins the continuation
//! anchors and disables decay.

use serde::Deserialize;
use serde_json::{json, Value};

use mnema_core::SearchOptions;

use super::search::hit_to_json;
use super::ToolContext;
use crate::envelope::{ToolError, ToolOutput, ToolResult};

// ============================================================================
// INTENT / MODE
// ============================================================================

/// What the user is about to do, inferred from the prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    AddFeature,
    FixBug,
    Refactor,
    SecurityAudit,
    Understand,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::AddFeature => "add_feature",
            Intent::FixBug => "fix_bug",
            Intent::Refactor => "refactor",
            Intent::SecurityAudit => "security_audit",
            Intent::Understand => "understand",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "add_feature" => Some(Intent::AddFeature),
            "fix_bug" => Some(Intent::FixBug),
            "refactor" => Some(Intent::Refactor),
            "security_audit" => Some(Intent::SecurityAudit),
            "understand" => Some(Intent::Understand),
            _ => None,
        }
    }
}

/// Classify intent from the raw prompt
pub fn classify_intent(input: &str) -> Intent {
    let lower = input.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["security", "vulnerability", "audit", "cve", "exploit"]) {
        return Intent::SecurityAudit;
    }
    if has(&["fix", "bug", "broken", "crash", "failing", "regression"]) {
        return Intent::FixBug;
    }
    if has(&["refactor", "clean up", "restructure", "simplify", "extract"]) {
        return Intent::Refactor;
    }
    if has(&["add ", "implement", "build ", "new feature", "support for"]) {
        return Intent::AddFeature;
    }
    Intent::Understand
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Auto,
    Quick,
    Deep,
    Focused,
    Resume,
}

impl Mode {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(Mode::Auto),
            "quick" => Some(Mode::Quick),
            "deep" => Some(Mode::Deep),
            "focused" => Some(Mode::Focused),
            "resume" => Some(Mode::Resume),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Mode::Auto => "auto",
            Mode::Quick => "quick",
            Mode::Deep => "deep",
            Mode::Focused => "focused",
            Mode::Resume => "resume",
        }
    }

    fn for_intent(intent: Intent) -> Mode {
        match intent {
            Intent::Understand => Mode::Quick,
            Intent::FixBug => Mode::Focused,
            Intent::AddFeature | Intent::Refactor | Intent::SecurityAudit => Mode::Deep,
        }
    }

    fn token_budget(&self) -> usize {
        match self {
            Mode::Quick => 2_000,
            Mode::Focused => 4_000,
            Mode::Resume => 6_000,
            Mode::Deep | Mode::Auto => 8_000,
        }
    }

    fn result_limit(&self) -> usize {
        match self {
            Mode::Quick => 5,
            Mode::Focused | Mode::Resume => 8,
            Mode::Deep | Mode::Auto => 10,
        }
    }
}

/// Anchors pinned when resuming a previous session
const RESUME_ANCHORS: [&str; 4] = ["state", "next-steps", "summary", "blockers"];

// ============================================================================
// EXECUTE
// ============================================================================

pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "input": { "type": "string", "description": "The user prompt or task description" },
            "mode": {
                "type": "string",
                "enum": ["auto", "quick", "deep", "focused", "resume"],
                "default": "auto"
            },
            "intent": {
                "type": "string",
                "enum": ["add_feature", "fix_bug", "refactor", "security_audit", "understand"],
                "description": "Overrides classification when mode=auto"
            },
            "sessionId": { "type": "string", "description": "Enables the per-session working-memory pipeline" },
            "turn": { "type": "integer", "default": 1 },
            "specFolder": { "type": "string" },
            "anchors": { "type": "array", "items": { "type": "string" } },
            "maxTokens": { "type": "integer", "description": "Overrides the mode's token budget" }
        },
        "required": ["input"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContextArgs {
    input: String,
    mode: Option<String>,
    intent: Option<String>,
    session_id: Option<String>,
    #[serde(default = "default_turn")]
    turn: i64,
    spec_folder: Option<String>,
    #[serde(default)]
    anchors: Vec<String>,
    max_tokens: Option<usize>,
}

fn default_turn() -> i64 {
    1
}

pub async fn execute(ctx: &ToolContext, args: Option<Value>) -> ToolResult {
    let args: ContextArgs = match args {
        Some(value) => serde_json::from_value(value).map_err(|e| ToolError::invalid_args(&e))?,
        None => return Err(ToolError::missing_param("input")),
    };
    if args.input.trim().is_empty() {
        return Err(ToolError::missing_param("input"));
    }

    let requested = match args.mode.as_deref() {
        Some(s) => {
            Mode::parse(s).ok_or_else(|| ToolError::invalid_param(format!("unknown mode: {s:?}")))?
        }
        None => Mode::Auto,
    };
    let intent = match args.intent.as_deref() {
        Some(s) => Intent::parse(s)
            .ok_or_else(|| ToolError::invalid_param(format!("unknown intent: {s:?}")))?,
        None => classify_intent(&args.input),
    };
    let mode = if requested == Mode::Auto {
        Mode::for_intent(intent)
    } else {
        requested
    };

    let mut anchors = args.anchors;
    if mode == Mode::Resume && anchors.is_empty() {
        anchors = RESUME_ANCHORS.iter().map(|s| s.to_string()).collect();
    }
    let use_decay = mode != Mode::Resume;
    let budget_tokens = args.max_tokens.unwrap_or_else(|| mode.token_budget());
    let budget_chars = budget_tokens.saturating_mul(4);

    // Route: quick answers from the trigger map, everything else runs
    // hybrid retrieval
    let opts = SearchOptions {
        limit: mode.result_limit(),
        spec_folder: args.spec_folder,
        anchors: anchors.clone(),
        use_decay,
        ..Default::default()
    };
    let mut results: Vec<Value> = if mode == Mode::Quick {
        let matches = ctx.storage.match_triggers(&args.input, opts.limit)?;
        let mut out = Vec::new();
        for m in &matches {
            if let Err(e) = ctx.storage.strengthen_on_access(m.memory_id) {
                tracing::warn!(id = m.memory_id, "access strengthening failed: {e}");
            }
            if let Some(record) = ctx.storage.get_memory(m.memory_id)? {
                out.push(json!({
                    "id": record.id,
                    "title": record.title,
                    "file_path": record.file_path,
                    "importance_tier": record.importance_tier.as_str(),
                    "matched_phrases": m.matched_phrases,
                    "content": record.content,
                }));
            }
        }
        if out.is_empty() {
            // Nothing triggered; fall through to hybrid retrieval
            ctx.storage
                .search_memories(&args.input, &opts)?
                .iter()
                .map(hit_to_json)
                .collect()
        } else {
            out
        }
    } else {
        ctx.storage
            .search_memories(&args.input, &opts)?
            .iter()
            .map(hit_to_json)
            .collect()
    };

    // Enforce the budget across result contents
    let mut spent = 0usize;
    for result in &mut results {
        if let Some(content) = result.get_mut("content") {
            if let Some(text) = content.as_str() {
                let remaining = budget_chars.saturating_sub(spent);
                if text.len() > remaining {
                    let mut end = remaining;
                    while end > 0 && !text.is_char_boundary(end) {
                        end -= 1;
                    }
                    *content = json!(text[..end].to_string());
                    spent = budget_chars;
                } else {
                    spent += text.len();
                }
            }
        }
    }

    // Working-memory turn when a session is attached
    let working_memory = match &args.session_id {
        Some(session_id) => {
            let outcome = ctx
                .storage
                .observe_turn(session_id, args.turn, &args.input, use_decay)?;
            Some(serde_json::to_value(&outcome).unwrap_or(Value::Null))
        }
        None => None,
    };

    let summary = format!(
        "{} context ({}): {} memories within {} tokens",
        mode.as_str(),
        intent.as_str(),
        results.len(),
        budget_tokens
    );
    Ok(ToolOutput::new(
        summary,
        json!({
            "mode": mode.as_str(),
            "intent": intent.as_str(),
            "token_budget": budget_tokens,
            "anchors": anchors,
            "results": results,
            "working_memory": working_memory,
        }),
    ))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::fixtures::test_context;
    use mnema_core::{ContextType, ImportanceTier, IndexOptions, SaveRequest};

    fn seed(ctx: &ToolContext, title: &str, content: &str, triggers: &[&str]) -> i64 {
        ctx.indexer
            .save_memory(
                SaveRequest {
                    spec_folder: "specs/007-auth".to_string(),
                    title: title.to_string(),
                    content: content.to_string(),
                    trigger_phrases: triggers.iter().map(|s| s.to_string()).collect(),
                    context_type: ContextType::Decision,
                    importance_tier: ImportanceTier::Important,
                    file_path: None,
                },
                IndexOptions::default(),
            )
            .unwrap()
            .id
    }

    #[test]
    fn intent_classification() {
        assert_eq!(classify_intent("fix the login bug"), Intent::FixBug);
        assert_eq!(classify_intent("add support for SSO"), Intent::AddFeature);
        assert_eq!(classify_intent("refactor the token module"), Intent::Refactor);
        assert_eq!(
            classify_intent("run a security audit of the session layer"),
            Intent::SecurityAudit
        );
        assert_eq!(classify_intent("how does auth work?"), Intent::Understand);
    }

    #[tokio::test]
    async fn auto_mode_routes_by_intent() {
        let (ctx, _dir) = test_context();
        seed(&ctx, "OAuth flow", "oauth jwt token details", &["oauth"]);

        // understand -> quick (trigger path)
        let output = execute(&ctx, Some(json!({ "input": "how does oauth work?" })))
            .await
            .unwrap();
        assert_eq!(output.data["mode"], "quick");
        assert_eq!(output.data["intent"], "understand");
        assert_eq!(output.data["results"].as_array().unwrap().len(), 1);

        // fix_bug -> focused
        let output = execute(&ctx, Some(json!({ "input": "fix the oauth token bug" })))
            .await
            .unwrap();
        assert_eq!(output.data["mode"], "focused");
        assert_eq!(output.data["intent"], "fix_bug");
    }

    #[tokio::test]
    async fn resume_pins_anchors_and_skips_decay() {
        let (ctx, _dir) = test_context();
        seed(&ctx, "Session state", "oauth progress notes", &["oauth"]);

        let output = execute(
            &ctx,
            Some(json!({ "input": "resume oauth work", "mode": "resume", "sessionId": "s1", "turn": 5 })),
        )
        .await
        .unwrap();
        assert_eq!(output.data["mode"], "resume");
        let anchors: Vec<String> = output.data["anchors"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        assert_eq!(anchors, vec!["state", "next-steps", "summary", "blockers"]);
        assert!(output.data["working_memory"].is_object());
    }

    #[tokio::test]
    async fn token_budget_truncates_content() {
        let (ctx, _dir) = test_context();
        let long_content = format!("oauth long body {}", "word ".repeat(2000));
        seed(&ctx, "Long", &long_content, &["oauth"]);

        let output = execute(
            &ctx,
            Some(json!({ "input": "oauth", "mode": "deep", "maxTokens": 50 })),
        )
        .await
        .unwrap();
        let content = output.data["results"][0]["content"].as_str().unwrap();
        assert!(content.len() <= 200);
    }

    #[tokio::test]
    async fn explicit_intent_overrides_classification() {
        let (ctx, _dir) = test_context();
        let output = execute(
            &ctx,
            Some(json!({ "input": "how does this work", "intent": "security_audit" })),
        )
        .await
        .unwrap();
        assert_eq!(output.data["intent"], "security_audit");
        assert_eq!(output.data["mode"], "deep");
    }

    #[tokio::test]
    async fn invalid_mode_rejected() {
        let (ctx, _dir) = test_context();
        let err = execute(&ctx, Some(json!({ "input": "x", "mode": "turbo" })))
            .await
            .unwrap_err();
        assert_eq!(err.code, crate::envelope::ErrorCode::InvalidParameter);
    }
}
