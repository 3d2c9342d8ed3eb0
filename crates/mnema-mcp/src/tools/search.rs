//! memory_search
//!
//! Hybrid retrieval (vector + FTS with RRF fusion), or multi-concept
//! intersection search when `concepts` is given. Constitutional rows
//! pin into the result set; anchors project spans instead of full
//! content; every returned memory is strengthened (testing effect).

use serde::Deserialize;
use serde_json::{json, Value};

use mnema_core::{ContextType, ImportanceTier, SearchHit, SearchOptions};

use super::ToolContext;
use crate::envelope::{ToolError, ToolOutput, ToolResult};

pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": "Natural-language search query"
            },
            "concepts": {
                "type": "array",
                "items": { "type": "string" },
                "minItems": 2,
                "maxItems": 5,
                "description": "2-5 concepts that must ALL match (intersection search); overrides plain query ranking"
            },
            "limit": { "type": "integer", "default": 10 },
            "specFolder": { "type": "string" },
            "tier": {
                "type": "string",
                "enum": ["constitutional", "critical", "important", "normal", "temporary", "deprecated"]
            },
            "contextType": {
                "type": "string",
                "enum": ["research", "implementation", "decision", "discovery", "general"]
            },
            "useDecay": { "type": "boolean", "default": true },
            "includeContiguity": {
                "type": "boolean",
                "default": false,
                "description": "Boost memories created close in time to the top hit"
            },
            "includeConstitutional": { "type": "boolean", "default": true },
            "anchors": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Return only these anchor spans from matching memories"
            },
            "minSimilarity": { "type": "number", "default": 0.0 }
        },
        "required": ["query"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchArgs {
    query: String,
    #[serde(default)]
    concepts: Vec<String>,
    #[serde(default = "default_limit")]
    limit: usize,
    spec_folder: Option<String>,
    tier: Option<String>,
    context_type: Option<String>,
    #[serde(default = "default_true")]
    use_decay: bool,
    #[serde(default)]
    include_contiguity: bool,
    #[serde(default = "default_true")]
    include_constitutional: bool,
    #[serde(default)]
    anchors: Vec<String>,
    #[serde(default)]
    min_similarity: f32,
}

fn default_limit() -> usize {
    10
}

fn default_true() -> bool {
    true
}

pub(crate) fn parse_options(
    spec_folder: Option<String>,
    tier: Option<String>,
    context_type: Option<String>,
) -> Result<(Option<String>, Option<ImportanceTier>, Option<ContextType>), ToolError> {
    let tier = tier
        .map(|t| {
            ImportanceTier::parse(&t)
                .ok_or_else(|| ToolError::invalid_param(format!("unknown importance tier: {t:?}")))
        })
        .transpose()?;
    let context_type = context_type
        .map(|ct| {
            ContextType::parse(&ct)
                .ok_or_else(|| ToolError::invalid_param(format!("unknown context type: {ct:?}")))
        })
        .transpose()?;
    Ok((spec_folder, tier, context_type))
}

pub(crate) fn hit_to_json(hit: &SearchHit) -> Value {
    json!({
        "id": hit.memory.id,
        "title": hit.memory.title,
        "file_path": hit.memory.file_path,
        "spec_folder": hit.memory.spec_folder,
        "importance_tier": hit.memory.importance_tier.as_str(),
        "context_type": hit.memory.context_type.as_str(),
        "trigger_phrases": hit.memory.trigger_phrases,
        "similarity": hit.similarity,
        "score": hit.score,
        "pinned": hit.pinned,
        "content": hit.memory.content,
        "access_count": hit.memory.access_count,
    })
}

pub async fn execute(ctx: &ToolContext, args: Option<Value>) -> ToolResult {
    let args: SearchArgs = match args {
        Some(value) => serde_json::from_value(value).map_err(|e| ToolError::invalid_args(&e))?,
        None => return Err(ToolError::missing_param("query")),
    };
    if args.query.trim().is_empty() {
        return Err(ToolError::missing_param("query"));
    }

    let (spec_folder, tier, context_type) =
        parse_options(args.spec_folder, args.tier, args.context_type)?;
    let opts = SearchOptions {
        limit: args.limit.clamp(1, 100),
        spec_folder,
        tier,
        context_type,
        use_decay: args.use_decay,
        include_contiguity: args.include_contiguity,
        include_constitutional: args.include_constitutional,
        anchors: args.anchors,
        min_similarity: args.min_similarity,
    };

    let (hits, mode) = if args.concepts.is_empty() {
        (ctx.storage.search_memories(&args.query, &opts)?, "hybrid")
    } else {
        let mut embeddings = Vec::with_capacity(args.concepts.len());
        for concept in &args.concepts {
            embeddings.push(ctx.storage.embed_query_cached(concept)?);
        }
        let hits = ctx.storage.multi_concept_search(&embeddings, &opts)?;
        for hit in &hits {
            if let Err(e) = ctx.storage.strengthen_on_access(hit.memory.id) {
                tracing::warn!(id = hit.memory.id, "access strengthening failed: {e}");
            }
        }
        (hits, "multi_concept")
    };

    let results: Vec<Value> = hits.iter().map(hit_to_json).collect();
    let summary = match results.len() {
        0 => format!("no memories matched \"{}\"", args.query),
        1 => format!("1 memory matched \"{}\"", args.query),
        n => format!("{n} memories matched \"{}\"", args.query),
    };

    let mut output = ToolOutput::new(
        summary,
        json!({ "results": results, "mode": mode, "count": hits.len() }),
    );
    if hits.is_empty() {
        output = output
            .with_hint("try memory_match_triggers for phrase-based recall")
            .with_hint("or broaden the query and drop folder/tier filters");
    }
    Ok(output)
}

// ============================================================================
// TESTS
// ============================================================================
