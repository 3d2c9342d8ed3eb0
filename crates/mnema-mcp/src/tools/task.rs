//! task_preflight / task_postflight / memory_get_learning_history
//!
//! Epistemic bookkeeping per task: score yourself before starting,
//! score yourself after, and the store computes what you learned.

use serde::Deserialize;
use serde_json::{json, Value};

use mnema_core::{interpret_learning_index, EpistemicScores, HistoryFilter};

use super::ToolContext;
use crate::envelope::{ToolError, ToolOutput, ToolResult};

// ============================================================================
// SCHEMAS
// ============================================================================

pub fn preflight_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "specFolder": { "type": "string" },
            "taskId": { "type": "string" },
            "sessionId": { "type": "string" },
            "knowledgeScore": { "type": "integer", "minimum": 0, "maximum": 100 },
            "uncertaintyScore": { "type": "integer", "minimum": 0, "maximum": 100 },
            "contextScore": { "type": "integer", "minimum": 0, "maximum": 100 },
            "knowledgeGaps": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["specFolder", "taskId", "knowledgeScore", "uncertaintyScore", "contextScore"]
    })
}

pub fn postflight_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "specFolder": { "type": "string" },
            "taskId": { "type": "string" },
            "knowledgeScore": { "type": "integer", "minimum": 0, "maximum": 100 },
            "uncertaintyScore": { "type": "integer", "minimum": 0, "maximum": 100 },
            "contextScore": { "type": "integer", "minimum": 0, "maximum": 100 },
            "gapsClosed": { "type": "array", "items": { "type": "string" } },
            "newGapsDiscovered": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["specFolder", "taskId", "knowledgeScore", "uncertaintyScore", "contextScore"]
    })
}

pub fn history_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "specFolder": { "type": "string" },
            "sessionId": { "type": "string" },
            "onlyComplete": { "type": "boolean", "default": false },
            "includeSummary": { "type": "boolean", "default": true },
            "limit": { "type": "integer", "default": 50 }
        }
    })
}

// ============================================================================
// EXECUTE
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreflightArgs {
    spec_folder: String,
    task_id: String,
    session_id: Option<String>,
    knowledge_score: i64,
    uncertainty_score: i64,
    context_score: i64,
    #[serde(default)]
    knowledge_gaps: Vec<String>,
}

pub async fn execute_preflight(ctx: &ToolContext, args: Option<Value>) -> ToolResult {
    let args: PreflightArgs = match args {
        Some(value) => serde_json::from_value(value).map_err(|e| ToolError::invalid_args(&e))?,
        None => return Err(ToolError::missing_param("specFolder")),
    };
    let record = ctx.storage.task_preflight(
        &args.spec_folder,
        &args.task_id,
        args.session_id.as_deref(),
        EpistemicScores {
            knowledge: args.knowledge_score,
            uncertainty: args.uncertainty_score,
            context: args.context_score,
        },
        &args.knowledge_gaps,
    )?;
    Ok(ToolOutput::new(
        format!(
            "preflight recorded for {}/{}",
            record.spec_folder, record.task_id
        ),
        json!({ "record": record }),
    )
    .with_hint("call task_postflight with the same specFolder/taskId when the task completes"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostflightArgs {
    spec_folder: String,
    task_id: String,
    knowledge_score: i64,
    uncertainty_score: i64,
    context_score: i64,
    #[serde(default)]
    gaps_closed: Vec<String>,
    #[serde(default)]
    new_gaps_discovered: Vec<String>,
}

pub async fn execute_postflight(ctx: &ToolContext, args: Option<Value>) -> ToolResult {
    let args: PostflightArgs = match args {
        Some(value) => serde_json::from_value(value).map_err(|e| ToolError::invalid_args(&e))?,
        None => return Err(ToolError::missing_param("specFolder")),
    };
    let record = ctx.storage.task_postflight(
        &args.spec_folder,
        &args.task_id,
        EpistemicScores {
            knowledge: args.knowledge_score,
            uncertainty: args.uncertainty_score,
            context: args.context_score,
        },
        &args.gaps_closed,
        &args.new_gaps_discovered,
    )?;

    let index = record.learning_index.unwrap_or(0.0);
    let interpretation = interpret_learning_index(index);
    Ok(ToolOutput::new(
        format!("learning index {index:.2}: {interpretation}"),
        json!({
            "record": record,
            "deltas": {
                "knowledge": record.delta_knowledge,
                "uncertainty": record.delta_uncertainty,
                "context": record.delta_context,
            },
            "learning_index": index,
            "interpretation": interpretation,
        }),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryArgs {
    spec_folder: Option<String>,
    session_id: Option<String>,
    #[serde(default)]
    only_complete: bool,
    #[serde(default = "default_true")]
    include_summary: bool,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_true() -> bool {
    true
}

fn default_limit() -> usize {
    50
}

pub async fn execute_history(ctx: &ToolContext, args: Option<Value>) -> ToolResult {
    let args: HistoryArgs = serde_json::from_value(args.unwrap_or_else(|| json!({})))
        .map_err(|e| ToolError::invalid_args(&e))?;
    let (records, summary) = ctx.storage.learning_history(
        &HistoryFilter {
            spec_folder: args.spec_folder,
            session_id: args.session_id,
            only_complete: args.only_complete,
            limit: args.limit,
        },
        args.include_summary,
    )?;
    Ok(ToolOutput::new(
        format!("{} learning records", records.len()),
        json!({ "records": records, "summary": summary, "count": records.len() }),
    ))
}

// ============================================================================
// TESTS
// ============================================================================
