//! memory_causal_link / memory_causal_unlink / memory_causal_stats /
//! memory_drift_why
//!
//! Typed edges between memories and the bounded traversal that
//! explains why a memory exists.

use serde::Deserialize;
use serde_json::{json, Value};

use mnema_core::{ChainOptions, Direction, Relation};

use super::ToolContext;
use crate::envelope::{ToolError, ToolOutput, ToolResult};

// ============================================================================
// SCHEMAS
// ============================================================================

pub fn link_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "sourceId": { "type": "integer" },
            "targetId": { "type": "integer" },
            "relation": {
                "type": "string",
                "enum": ["caused_by", "enabled_by", "supersedes", "contradicts", "derived_from", "supports"]
            },
            "strength": { "type": "number", "minimum": 0, "maximum": 1, "default": 1.0 },
            "evidence": { "type": "string" }
        },
        "required": ["sourceId", "targetId", "relation"]
    })
}

pub fn unlink_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "edgeId": { "type": "integer" }
        },
        "required": ["edgeId"]
    })
}

pub fn stats_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

pub fn drift_why_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "memoryId": { "type": "integer" },
            "maxDepth": { "type": "integer", "minimum": 1, "maximum": 10, "default": 3 },
            "direction": { "type": "string", "enum": ["outgoing", "incoming", "both"], "default": "both" },
            "relations": {
                "type": "array",
                "items": {
                    "type": "string",
                    "enum": ["caused_by", "enabled_by", "supersedes", "contradicts", "derived_from", "supports"]
                }
            }
        },
        "required": ["memoryId"]
    })
}

// ============================================================================
// EXECUTE
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkArgs {
    source_id: i64,
    target_id: i64,
    relation: String,
    #[serde(default = "default_strength")]
    strength: f64,
    evidence: Option<String>,
}

fn default_strength() -> f64 {
    1.0
}

pub async fn execute_link(ctx: &ToolContext, args: Option<Value>) -> ToolResult {
    let args: LinkArgs = match args {
        Some(value) => serde_json::from_value(value).map_err(|e| ToolError::invalid_args(&e))?,
        None => return Err(ToolError::missing_param("sourceId")),
    };
    let relation = Relation::parse(&args.relation)
        .ok_or_else(|| ToolError::invalid_param(format!("unknown relation: {:?}", args.relation)))?;

    let edge_id = ctx.storage.insert_edge(
        args.source_id,
        args.target_id,
        relation,
        args.strength,
        args.evidence.as_deref(),
    )?;
    Ok(ToolOutput::new(
        format!(
            "linked {} -[{}]-> {}",
            args.source_id, relation, args.target_id
        ),
        json!({ "edge_id": edge_id }),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnlinkArgs {
    edge_id: i64,
}

pub async fn execute_unlink(ctx: &ToolContext, args: Option<Value>) -> ToolResult {
    let args: UnlinkArgs = match args {
        Some(value) => serde_json::from_value(value).map_err(|e| ToolError::invalid_args(&e))?,
        None => return Err(ToolError::missing_param("edgeId")),
    };
    if !ctx.storage.delete_edge(args.edge_id)? {
        return Err(ToolError::from(mnema_core::StorageError::NotFound(
            format!("edge {}", args.edge_id),
        )));
    }
    Ok(ToolOutput::new(
        format!("removed edge {}", args.edge_id),
        json!({ "deleted": args.edge_id }),
    ))
}

pub async fn execute_stats(ctx: &ToolContext, _args: Option<Value>) -> ToolResult {
    let stats = ctx.storage.causal_stats()?;
    let summary = format!(
        "{} edges, {:.0}% of memories linked",
        stats.total_edges, stats.link_coverage_percent
    );
    let relation_types: Vec<&str> = Relation::ALL.iter().map(Relation::as_str).collect();
    let mut data = serde_json::to_value(&stats).unwrap_or(Value::Null);
    if let Some(map) = data.as_object_mut() {
        map.insert("relation_types".to_string(), json!(relation_types));
    }
    let mut output = ToolOutput::new(summary, data);
    if stats.orphaned_edges > 0 {
        output = output.with_hint("orphaned edges present; call memory_drift_why to locate edge ids");
    }
    Ok(output)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriftWhyArgs {
    memory_id: i64,
    #[serde(default = "default_depth")]
    max_depth: usize,
    direction: Option<String>,
    #[serde(default)]
    relations: Vec<String>,
}

fn default_depth() -> usize {
    3
}

pub async fn execute_drift_why(ctx: &ToolContext, args: Option<Value>) -> ToolResult {
    let args: DriftWhyArgs = match args {
        Some(value) => serde_json::from_value(value).map_err(|e| ToolError::invalid_args(&e))?,
        None => return Err(ToolError::missing_param("memoryId")),
    };
    let direction = match args.direction.as_deref() {
        Some(s) => Direction::parse(s)
            .ok_or_else(|| ToolError::invalid_param(format!("unknown direction: {s:?}")))?,
        None => Direction::Both,
    };
    let mut relations = Vec::new();
    for raw in &args.relations {
        relations.push(
            Relation::parse(raw)
                .ok_or_else(|| ToolError::invalid_param(format!("unknown relation: {raw:?}")))?,
        );
    }

    let chain = ctx.storage.get_causal_chain(
        args.memory_id,
        &ChainOptions {
            max_depth: args.max_depth,
            direction,
            relations,
        },
    )?;

    // Human-oriented reading of the strongest incoming explanations
    let mut reasons = Vec::new();
    for edge in chain.by_cause.iter().chain(chain.by_derived_from.iter()) {
        if edge.source_id == args.memory_id {
            if let Some(other) = ctx.storage.get_memory(edge.target_id)? {
                reasons.push(format!("{} \"{}\"", edge.relation, other.title));
            }
        }
    }
    let summary = if chain.all.is_empty() {
        format!("memory {} has no causal links", args.memory_id)
    } else if reasons.is_empty() {
        format!("memory {} has {} causal links", args.memory_id, chain.all.len())
    } else {
        format!("memory {}: {}", args.memory_id, reasons.join("; "))
    };

    let mut output = ToolOutput::new(summary, json!({ "chain": chain }));
    if chain.max_depth_reached {
        output = output.with_hint("traversal hit maxDepth; raise it to see the full chain");
    }
    Ok(output)
}

// ============================================================================
// TESTS
// ============================================================================
