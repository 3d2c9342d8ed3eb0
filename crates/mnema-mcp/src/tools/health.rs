//! memory_health and memory_validate

use serde::Deserialize;
use serde_json::{json, Value};

use mnema_core::parser;

use super::ToolContext;
use crate::envelope::{ToolError, ToolOutput, ToolResult};

// ============================================================================
// memory_health
// ============================================================================

pub fn health_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "autoClean": {
                "type": "boolean",
                "default": false,
                "description": "Delete orphaned vector rows found by the integrity pass"
            }
        }
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HealthArgs {
    #[serde(default)]
    auto_clean: bool,
}

pub async fn execute_health(ctx: &ToolContext, args: Option<Value>) -> ToolResult {
    let args: HealthArgs = serde_json::from_value(args.unwrap_or_else(|| json!({})))
        .map_err(|e| ToolError::invalid_args(&e))?;

    let integrity = ctx.storage.verify_integrity(args.auto_clean)?;
    let stats = ctx.storage.stats()?;
    let provider_ready = ctx.storage.provider().is_ready();
    let schema_version = ctx
        .storage
        .config_get(mnema_core::storage::CONFIG_SCHEMA_VERSION)?;

    let healthy = integrity.is_clean() && provider_ready;
    let summary = if healthy {
        format!("healthy: {} memories, integrity clean", stats.total_memories)
    } else if !integrity.is_clean() {
        "integrity issues found; see data.integrity".to_string()
    } else {
        "embedding provider not ready; vector writes will fail".to_string()
    };

    let mut output = ToolOutput::new(
        summary,
        json!({
            "healthy": healthy,
            "db_path": ctx.storage.db_path(),
            "profile": ctx.storage.profile(),
            "provider_ready": provider_ready,
            "schema_version": schema_version,
            "total_memories": stats.total_memories,
            "integrity": integrity,
        }),
    );
    if !integrity.is_clean() && !args.auto_clean {
        output = output.with_hint("re-run with autoClean=true to remove orphaned vectors");
    }
    Ok(output)
}

// ============================================================================
// memory_validate
// ============================================================================

pub fn validate_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "filePath": {
                "type": "string",
                "description": "Memory file to validate (relative to the base dir), without writing anything"
            }
        },
        "required": ["filePath"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidateArgs {
    file_path: String,
}

pub async fn execute_validate(ctx: &ToolContext, args: Option<Value>) -> ToolResult {
    let args: ValidateArgs = match args {
        Some(value) => serde_json::from_value(value).map_err(|e| ToolError::invalid_args(&e))?,
        None => return Err(ToolError::missing_param("filePath")),
    };

    let rel = std::path::Path::new(&args.file_path);
    if !parser::is_allowed_root(rel) {
        return Err(ToolError::invalid_param(format!(
            "{} is outside the allowed memory roots (specs/**/memory, .opencode/skill/*/constitutional)",
            args.file_path
        )));
    }
    let absolute = ctx.indexer.base_dir().join(rel);
    let raw = std::fs::read_to_string(&absolute)
        .map_err(|e| ToolError::from(mnema_core::StorageError::Io(e)))?;

    let outcome = parser::parse_memory_file(rel, &raw);
    let summary = if outcome.valid {
        match outcome.warnings.len() {
            0 => format!("{} is valid", args.file_path),
            n => format!("{} is valid with {n} warning(s)", args.file_path),
        }
    } else {
        format!(
            "{} failed validation with {} error(s)",
            args.file_path,
            outcome.errors.len()
        )
    };

    Ok(ToolOutput::new(summary, serde_json::to_value(&outcome).unwrap_or(Value::Null)))
}

// ============================================================================
// TESTS
// ============================================================================
