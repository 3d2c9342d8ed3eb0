//! memory_save
//!
//! Gate-driven inline save: the content runs through the full
//! prediction-error pipeline, so a near-duplicate reinforces or updates
//! instead of growing the store.

use serde::Deserialize;
use serde_json::{json, Value};

use mnema_core::{IndexOptions, SaveRequest};

use super::search::parse_options;
use super::ToolContext;
use crate::envelope::{ToolError, ToolOutput, ToolResult};

pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "specFolder": { "type": "string", "description": "Owning spec folder, e.g. specs/007-auth" },
            "title": { "type": "string" },
            "content": { "type": "string" },
            "triggerPhrases": {
                "type": "array",
                "items": { "type": "string" },
                "maxItems": 10
            },
            "contextType": {
                "type": "string",
                "enum": ["research", "implementation", "decision", "discovery", "general"],
                "default": "general"
            },
            "importanceTier": {
                "type": "string",
                "enum": ["constitutional", "critical", "important", "normal", "temporary", "deprecated"],
                "default": "normal"
            },
            "filePath": { "type": "string", "description": "Derived from folder + title when absent" },
            "allowPartialUpdate": {
                "type": "boolean",
                "default": false,
                "description": "Store with a pending embedding instead of failing when the provider is down"
            }
        },
        "required": ["specFolder", "title", "content"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveArgs {
    spec_folder: String,
    title: String,
    content: String,
    #[serde(default)]
    trigger_phrases: Vec<String>,
    context_type: Option<String>,
    importance_tier: Option<String>,
    file_path: Option<String>,
    #[serde(default)]
    allow_partial_update: bool,
}

pub async fn execute(ctx: &ToolContext, args: Option<Value>) -> ToolResult {
    let args: SaveArgs = match args {
        Some(value) => serde_json::from_value(value).map_err(|e| ToolError::invalid_args(&e))?,
        None => return Err(ToolError::missing_param("specFolder")),
    };
    let (_, tier, context_type) = parse_options(None, args.importance_tier, args.context_type)?;

    let result = ctx.indexer.save_memory(
        SaveRequest {
            spec_folder: args.spec_folder,
            title: args.title,
            content: args.content,
            trigger_phrases: args.trigger_phrases,
            context_type: context_type.unwrap_or_default(),
            importance_tier: tier.unwrap_or_default(),
            file_path: args.file_path,
        },
        IndexOptions {
            force: false,
            allow_partial_update: args.allow_partial_update,
        },
    )?;

    let summary = match result.status {
        mnema_core::IndexStatus::Created => format!("created memory {}", result.id),
        mnema_core::IndexStatus::Updated => format!("updated memory {}", result.id),
        mnema_core::IndexStatus::Reinforced => {
            format!("reinforced existing memory {}", result.id)
        }
        mnema_core::IndexStatus::Superseded => format!(
            "memory {} superseded {}",
            result.id,
            result
                .superseded_id
                .map(|id| id.to_string())
                .unwrap_or_default()
        ),
        mnema_core::IndexStatus::Unchanged => format!("memory {} unchanged", result.id),
    };

    let mut output = ToolOutput::new(
        summary,
        json!({
            "status": result.status.as_str(),
            "id": result.id,
            "pe_action": result.pe_action.map(|a| a.as_str()),
            "pe_reason": result.pe_reason,
            "similarity": result.similarity,
            "superseded_id": result.superseded_id,
            "warnings": result.warnings,
        }),
    );
    if result.status == mnema_core::IndexStatus::Reinforced {
        output = output.with_hint(
            "content was a near-duplicate; the existing memory was strengthened instead of creating a new one",
        );
    }
    Ok(output)
}

// ============================================================================
// TESTS
// ============================================================================
