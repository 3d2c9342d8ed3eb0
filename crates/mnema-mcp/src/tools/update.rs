//! memory_update
//!
//! Direct field updates on a memory row. Changed content re-embeds;
//! dimension violations fail without mutating the row.

use serde::Deserialize;
use serde_json::{json, Value};

use mnema_core::MemoryUpdate;

use super::search::parse_options;
use super::ToolContext;
use crate::envelope::{ToolError, ToolOutput, ToolResult};

pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": { "type": "integer" },
            "title": { "type": "string" },
            "content": { "type": "string" },
            "triggerPhrases": { "type": "array", "items": { "type": "string" }, "maxItems": 10 },
            "contextType": {
                "type": "string",
                "enum": ["research", "implementation", "decision", "discovery", "general"]
            },
            "importanceTier": {
                "type": "string",
                "enum": ["constitutional", "critical", "important", "normal", "temporary", "deprecated"]
            },
            "confidence": { "type": "number", "minimum": 0, "maximum": 1 }
        },
        "required": ["id"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateArgs {
    id: i64,
    title: Option<String>,
    content: Option<String>,
    trigger_phrases: Option<Vec<String>>,
    context_type: Option<String>,
    importance_tier: Option<String>,
    confidence: Option<f64>,
}

pub async fn execute(ctx: &ToolContext, args: Option<Value>) -> ToolResult {
    let args: UpdateArgs = match args {
        Some(value) => serde_json::from_value(value).map_err(|e| ToolError::invalid_args(&e))?,
        None => return Err(ToolError::missing_param("id")),
    };
    if let Some(confidence) = args.confidence {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ToolError::invalid_param(format!(
                "confidence must be in [0, 1], got {confidence}"
            )));
        }
    }
    let (_, tier, context_type) = parse_options(None, args.importance_tier, args.context_type)?;

    // Changed content re-embeds and re-hashes
    let embedding = match &args.content {
        Some(content) => Some(ctx.storage.provider().embed_document(content).map_err(
            mnema_core::StorageError::Embedding,
        )?),
        None => None,
    };

    let update = MemoryUpdate {
        title: args.title,
        content_hash: args.content.as_deref().map(mnema_core::parser::content_hash),
        content: args.content,
        trigger_phrases: args
            .trigger_phrases
            .as_deref()
            .map(mnema_core::parser::normalize_triggers),
        context_type,
        importance_tier: tier,
        confidence: args.confidence,
        ..Default::default()
    };
    if update.is_empty() {
        return Err(ToolError::invalid_param(
            "no fields to update; pass at least one of title/content/triggerPhrases/contextType/importanceTier/confidence",
        ));
    }

    ctx.storage
        .update_memory(args.id, &update, embedding.as_deref(), false)?;
    let record = ctx
        .storage
        .get_memory(args.id)?
        .ok_or_else(|| mnema_core::StorageError::NotFound(format!("memory {}", args.id)))?;

    Ok(ToolOutput::new(
        format!("updated memory {}", args.id),
        json!({ "memory": record }),
    ))
}

// ============================================================================
// TESTS
// ============================================================================
