//! memory_list

use serde::Deserialize;
use serde_json::{json, Value};

use super::search::parse_options;
use super::ToolContext;
use crate::envelope::{ToolError, ToolOutput, ToolResult};

pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "specFolder": { "type": "string" },
            "tier": {
                "type": "string",
                "enum": ["constitutional", "critical", "important", "normal", "temporary", "deprecated"]
            },
            "limit": { "type": "integer", "default": 50 }
        }
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListArgs {
    spec_folder: Option<String>,
    tier: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

pub async fn execute(ctx: &ToolContext, args: Option<Value>) -> ToolResult {
    let args: ListArgs = serde_json::from_value(args.unwrap_or_else(|| json!({})))
        .map_err(|e| ToolError::invalid_args(&e))?;
    let (spec_folder, tier, _) = parse_options(args.spec_folder, args.tier, None)?;

    let records = ctx
        .storage
        .list_memories(spec_folder.as_deref(), tier, args.limit.clamp(1, 500))?;

    let results: Vec<Value> = records
        .iter()
        .map(|r| {
            json!({
                "id": r.id,
                "title": r.title,
                "file_path": r.file_path,
                "spec_folder": r.spec_folder,
                "importance_tier": r.importance_tier.as_str(),
                "context_type": r.context_type.as_str(),
                "trigger_phrases": r.trigger_phrases,
                "embedding_status": r.embedding_status.as_str(),
                "stability": r.stability,
                "access_count": r.access_count,
                "updated_at": r.updated_at,
            })
        })
        .collect();

    Ok(ToolOutput::new(
        format!("{} memories listed", results.len()),
        json!({ "memories": results, "count": results.len() }),
    ))
}

// ============================================================================
// TESTS
// ============================================================================
