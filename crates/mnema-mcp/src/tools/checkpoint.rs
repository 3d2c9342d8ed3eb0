//! checkpoint_create / checkpoint_list / checkpoint_restore /
//! checkpoint_delete

use serde::Deserialize;
use serde_json::{json, Value};

use super::ToolContext;
use crate::envelope::{ToolError, ToolOutput, ToolResult};

// ============================================================================
// SCHEMAS
// ============================================================================

pub fn create_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": { "type": "string" },
            "specFolder": { "type": "string", "description": "Scope the snapshot to one folder" },
            "metadata": { "type": "object", "description": "Opaque metadata stored with the checkpoint" }
        },
        "required": ["name"]
    })
}

pub fn list_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "specFolder": { "type": "string" },
            "limit": { "type": "integer", "default": 20 }
        }
    })
}

pub fn restore_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": { "type": "string" },
            "clearExisting": {
                "type": "boolean",
                "default": false,
                "description": "Replace the scoped subset instead of merging"
            }
        },
        "required": ["name"]
    })
}

pub fn delete_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": { "type": "string" }
        },
        "required": ["name"]
    })
}

// ============================================================================
// EXECUTE
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateArgs {
    name: String,
    spec_folder: Option<String>,
    metadata: Option<Value>,
}

pub async fn execute_create(ctx: &ToolContext, args: Option<Value>) -> ToolResult {
    let args: CreateArgs = match args {
        Some(value) => serde_json::from_value(value).map_err(|e| ToolError::invalid_args(&e))?,
        None => return Err(ToolError::missing_param("name")),
    };
    let info = ctx
        .storage
        .checkpoint_create(&args.name, args.spec_folder.as_deref(), args.metadata)?;
    Ok(ToolOutput::new(
        format!(
            "checkpoint '{}' created ({} memories, {} edges)",
            info.name, info.memory_count, info.edge_count
        ),
        json!({ "checkpoint": info }),
    ))
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ListArgs {
    spec_folder: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    20
}

pub async fn execute_list(ctx: &ToolContext, args: Option<Value>) -> ToolResult {
    let args: ListArgs = match args {
        Some(value) => serde_json::from_value(value).map_err(|e| ToolError::invalid_args(&e))?,
        None => ListArgs::default(),
    };
    let checkpoints = ctx
        .storage
        .checkpoint_list(args.spec_folder.as_deref(), args.limit)?;
    Ok(ToolOutput::new(
        format!("{} checkpoints", checkpoints.len()),
        json!({ "checkpoints": checkpoints, "count": checkpoints.len() }),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestoreArgs {
    name: String,
    #[serde(default)]
    clear_existing: bool,
}

pub async fn execute_restore(ctx: &ToolContext, args: Option<Value>) -> ToolResult {
    let args: RestoreArgs = match args {
        Some(value) => serde_json::from_value(value).map_err(|e| ToolError::invalid_args(&e))?,
        None => return Err(ToolError::missing_param("name")),
    };
    let report = ctx
        .storage
        .checkpoint_restore(&args.name, args.clear_existing)?;
    Ok(ToolOutput::new(
        format!(
            "restored '{}': {} memories, {} edges",
            report.name, report.memories_restored, report.edges_restored
        ),
        json!({ "report": report }),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteArgs {
    name: String,
}

pub async fn execute_delete(ctx: &ToolContext, args: Option<Value>) -> ToolResult {
    let args: DeleteArgs = match args {
        Some(value) => serde_json::from_value(value).map_err(|e| ToolError::invalid_args(&e))?,
        None => return Err(ToolError::missing_param("name")),
    };
    if !ctx.storage.checkpoint_delete(&args.name)? {
        return Err(ToolError::from(mnema_core::StorageError::NotFound(
            format!("checkpoint '{}'", args.name),
        )));
    }
    Ok(ToolOutput::new(
        format!("deleted checkpoint '{}'", args.name),
        json!({ "deleted": args.name }),
    ))
}

// ============================================================================
// TESTS
// ============================================================================
