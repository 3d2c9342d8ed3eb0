//! memory_stats

use serde_json::{json, Value};

use super::ToolContext;
use crate::envelope::{ToolOutput, ToolResult};

pub fn schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

pub async fn execute(ctx: &ToolContext, _args: Option<Value>) -> ToolResult {
    let stats = ctx.storage.stats()?;
    let graph = ctx.storage.causal_stats()?;

    let summary = format!(
        "{} memories ({} embedded), {} causal edges, {:.0}% link coverage",
        stats.total_memories, stats.embedded, graph.total_edges, graph.link_coverage_percent
    );

    Ok(ToolOutput::new(
        summary,
        json!({
            "memories": stats,
            "causal": {
                "total_edges": graph.total_edges,
                "by_relation": graph.by_relation,
                "link_coverage_percent": graph.link_coverage_percent,
            },
            "profile": ctx.storage.profile(),
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

    #[tokio::test]
    async fn stats_roundup() {
        let (ctx, _dir) = test_context();
        ctx.indexer
            .save_memory(
                SaveRequest {
                    spec_folder: "specs/007-auth".to_string(),
                    title: "A".to_string(),
                    content: "alpha content".to_string(),
                    trigger_phrases: vec![],
                    context_type: ContextType::General,
                    importance_tier: ImportanceTier::Normal,
                    file_path: None,
                },
                IndexOptions::default(),
            )
            .unwrap();

        let output = execute(&ctx, None).await.unwrap();
        assert_eq!(output.data["memories"]["totalMemories"], 1);
        assert_eq!(output.data["causal"]["total_edges"], 0);
        assert!(output.summary.contains("1 memories"));
    }
}
