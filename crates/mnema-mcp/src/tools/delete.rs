//! memory_delete
//!
//! Single delete by id, or bulk delete of a spec folder. Bulk requires
//! `confirm=true` and always takes an auto-checkpoint first so the
//! operation is reversible via checkpoint_restore.

use serde::Deserialize;
use serde_json::{json, Value};

use super::ToolContext;
use crate::envelope::{ErrorCode, ToolError, ToolOutput, ToolResult};

pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": { "type": "integer", "description": "Delete a single memory" },
            "specFolder": { "type": "string", "description": "Bulk-delete every memory in this folder" },
            "confirm": {
                "type": "boolean",
                "default": false,
                "description": "Required for bulk deletes"
            }
        }
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteArgs {
    id: Option<i64>,
    spec_folder: Option<String>,
    #[serde(default)]
    confirm: bool,
}

pub async fn execute(ctx: &ToolContext, args: Option<Value>) -> ToolResult {
    let args: DeleteArgs = match args {
        Some(value) => serde_json::from_value(value).map_err(|e| ToolError::invalid_args(&e))?,
        None => return Err(ToolError::missing_param("id")),
    };

    match (args.id, args.spec_folder) {
        (Some(id), None) => {
            let deleted = ctx.storage.delete_memory(id)?;
            if !deleted {
                return Err(ToolError::from(mnema_core::StorageError::NotFound(
                    format!("memory {id}"),
                )));
            }
            Ok(ToolOutput::new(
                format!("deleted memory {id}"),
                json!({ "deleted": [id], "count": 1 }),
            ))
        }
        (None, Some(folder)) => {
            if !args.confirm {
                return Err(ToolError::new(
                    ErrorCode::InvalidParameter,
                    format!("bulk delete of '{folder}' requires confirm=true"),
                    "bulk deletes are destructive and must be confirmed",
                    vec![
                        "re-run with confirm=true to proceed".to_string(),
                        "an auto-checkpoint will be taken first".to_string(),
                    ],
                ));
            }
            // Reversibility first: snapshot before destroying
            let checkpoint = ctx.storage.auto_checkpoint_before_cleanup(&folder)?;
            let deleted = ctx.storage.delete_folder(&folder)?;
            Ok(ToolOutput::new(
                format!(
                    "deleted {} memories from {folder} (checkpoint {})",
                    deleted.len(),
                    checkpoint.name
                ),
                json!({
                    "deleted": deleted,
                    "count": deleted.len(),
                    "auto_checkpoint": checkpoint.name,
                }),
            )
            .with_hint(format!(
                "restore with checkpoint_restore name=\"{}\" clearExisting=true",
                checkpoint.name
            )))
        }
        (Some(_), Some(_)) => Err(ToolError::invalid_param(
            "pass either 'id' or 'specFolder', not both",
        )),
        (None, None) => Err(ToolError::missing_param("id")),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::fixtures::test_context;
    use mnema_core::{ContextType, ImportanceTier, IndexOptions, SaveRequest};

    fn seed(ctx: &ToolContext, name: &str) -> i64 {
        ctx.indexer
            .save_memory(
                SaveRequest {
                    spec_folder: "specs/007-auth".to_string(),
                    title: name.to_string(),
                    content: format!("totally distinct content about {name} {name}"),
                    trigger_phrases: vec![],
                    context_type: ContextType::General,
                    importance_tier: ImportanceTier::Normal,
                    file_path: Some(format!("specs/007-auth/memory/{name}.md")),
                },
                IndexOptions::default(),
            )
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn single_delete() {
        let (ctx, _dir) = test_context();
        let id = seed(&ctx, "alpha");
        let output = execute(&ctx, Some(json!({ "id": id }))).await.unwrap();
        assert_eq!(output.data["count"], 1);
        assert!(ctx.storage.get_memory(id).unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let (ctx, _dir) = test_context();
        let err = execute(&ctx, Some(json!({ "id": 999 }))).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn bulk_requires_confirm() {
        let (ctx, _dir) = test_context();
        seed(&ctx, "alpha");
        let err = execute(&ctx, Some(json!({ "specFolder": "specs/007-auth" })))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParameter);
        assert!(err.recovery.actions.iter().any(|a| a.contains("confirm=true")));
    }

    #[tokio::test]
    async fn bulk_delete_takes_auto_checkpoint() {
        let (ctx, _dir) = test_context();
        seed(&ctx, "alpha");
        seed(&ctx, "omega");

        let output = execute(
            &ctx,
            Some(json!({ "specFolder": "specs/007-auth", "confirm": true })),
        )
        .await
        .unwrap();
        assert_eq!(output.data["count"], 2);
        let checkpoint = output.data["auto_checkpoint"].as_str().unwrap();
        assert!(checkpoint.starts_with("pre-cleanup-"));

        assert!(ctx
            .storage
            .get_memories_by_folder("specs/007-auth")
            .unwrap()
            .is_empty());

        // The checkpoint restores the folder
        ctx.storage.checkpoint_restore(checkpoint, true).unwrap();
        assert_eq!(
            ctx.storage
                .get_memories_by_folder("specs/007-auth")
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn both_id_and_folder_rejected() {
        let (ctx, _dir) = test_context();
        let err = execute(
            &ctx,
            Some(json!({ "id": 1, "specFolder": "specs/007-auth" })),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParameter);
    }
}
