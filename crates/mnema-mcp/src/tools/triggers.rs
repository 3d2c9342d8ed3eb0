//! memory_match_triggers
//!
//! Whole-phrase trigger matching over the cached trigger map. The fast
//! path: no embedding call, answers from RAM.

use serde::Deserialize;
use serde_json::{json, Value};

use super::ToolContext;
use crate::envelope::{ToolError, ToolOutput, ToolResult};

pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "prompt": {
                "type": "string",
                "description": "The user prompt to match trigger phrases against"
            },
            "limit": { "type": "integer", "default": 10 }
        },
        "required": ["prompt"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TriggerArgs {
    prompt: String,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    10
}

pub async fn execute(ctx: &ToolContext, args: Option<Value>) -> ToolResult {
    let args: TriggerArgs = match args {
        Some(value) => serde_json::from_value(value).map_err(|e| ToolError::invalid_args(&e))?,
        None => return Err(ToolError::missing_param("prompt")),
    };
    if args.prompt.trim().is_empty() {
        return Err(ToolError::missing_param("prompt"));
    }

    let matches = ctx
        .storage
        .match_triggers(&args.prompt, args.limit.clamp(1, 50))?;

    let mut results = Vec::with_capacity(matches.len());
    for m in &matches {
        // Retrieval observed: strengthen the matched memory
        if let Err(e) = ctx.storage.strengthen_on_access(m.memory_id) {
            tracing::warn!(id = m.memory_id, "access strengthening failed: {e}");
        }
        let record = ctx.storage.get_memory(m.memory_id)?;
        results.push(json!({
            "id": m.memory_id,
            "matched_phrases": m.matched_phrases,
            "importance_weight": m.importance_weight,
            "title": record.as_ref().map(|r| r.title.clone()),
            "file_path": record.as_ref().map(|r| r.file_path.clone()),
        }));
    }

    let summary = match results.len() {
        0 => "no trigger phrases matched".to_string(),
        1 => "1 memory triggered".to_string(),
        n => format!("{n} memories triggered"),
    };
    Ok(ToolOutput::new(
        summary,
        json!({ "matches": results, "count": results.len() }),
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

    #[tokio::test]
    async fn matches_and_ranks() {
        let (ctx, _dir) = test_context();
        let id = ctx
            .indexer
            .save_memory(
                SaveRequest {
                    spec_folder: "specs/007-auth".to_string(),
                    title: "OAuth flow".to_string(),
                    content: "body".to_string(),
                    trigger_phrases: vec!["oauth".to_string(), "jwt".to_string()],
                    context_type: ContextType::Decision,
                    importance_tier: ImportanceTier::Important,
                    file_path: None,
                },
                IndexOptions::default(),
            )
            .unwrap()
            .id;

        let output = execute(&ctx, Some(json!({ "prompt": "How does OAuth work?" })))
            .await
            .unwrap();
        assert_eq!(output.data["count"], 1);
        assert_eq!(output.data["matches"][0]["id"], id);
        assert_eq!(output.data["matches"][0]["matched_phrases"][0], "oauth");

        // Testing effect applied
        let record = ctx.storage.get_memory(id).unwrap().unwrap();
        assert_eq!(record.access_count, 1);
    }

    #[tokio::test]
    async fn no_match_is_empty_success() {
        let (ctx, _dir) = test_context();
        let output = execute(&ctx, Some(json!({ "prompt": "nothing here" })))
            .await
            .unwrap();
        assert_eq!(output.data["count"], 0);
    }

    #[tokio::test]
    async fn missing_prompt_fails() {
        let (ctx, _dir) = test_context();
        assert!(execute(&ctx, None).await.is_err());
    }
}
