//! memory_index_scan
//!
//! Batch/incremental scan of the memory roots. Rate limited by the
//! persisted cooldown; the second call inside the window returns
//! `RATE_LIMITED` without touching any file.

use serde::Deserialize;
use serde_json::{json, Value};

use mnema_core::ScanOptions;

use super::ToolContext;
use crate::envelope::{ToolError, ToolOutput, ToolResult};

pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "specFolder": { "type": "string", "description": "Restrict the scan to one spec folder" },
            "force": { "type": "boolean", "default": false, "description": "Re-index unchanged files too" },
            "includeConstitutional": { "type": "boolean", "default": true },
            "incremental": {
                "type": "boolean",
                "default": true,
                "description": "Skip files whose mtime and content hash are unchanged"
            }
        }
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScanArgs {
    spec_folder: Option<String>,
    #[serde(default)]
    force: bool,
    #[serde(default = "default_true")]
    include_constitutional: bool,
    #[serde(default = "default_true")]
    incremental: bool,
}

fn default_true() -> bool {
    true
}

pub async fn execute(ctx: &ToolContext, args: Option<Value>) -> ToolResult {
    let args: ScanArgs = serde_json::from_value(args.unwrap_or_else(|| json!({})))
        .map_err(|e| ToolError::invalid_args(&e))?;

    let report = ctx
        .indexer
        .scan(ScanOptions {
            spec_folder: args.spec_folder,
            force: args.force,
            include_constitutional: args.include_constitutional,
            incremental: args.incremental,
        })
        .await?;

    let summary = format!(
        "scanned {} files: {} created, {} updated, {} reinforced, {} unchanged, {} failed",
        report.scanned,
        report.created,
        report.updated,
        report.reinforced,
        report.unchanged,
        report.failed
    );
    let mut output = ToolOutput::new(
        summary,
        json!({ "status": "complete", "report": report }),
    );
    if report.failed > 0 {
        output = output.with_hint("inspect data.report.files[].error for per-file failures");
    }
    Ok(output)
}

// ============================================================================
// TESTS
// ============================================================================
