//! MCP server core
//!
//! Routes JSON-RPC requests to tool handlers. Before every tools/call
//! the `.db-updated` sentinel is checked so an external writer's
//! commit is never shadowed by stale caches.

use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::envelope::{run_tool, Envelope};
use crate::protocol::messages::{
    CallToolRequest, CallToolResult, InitializeRequest, InitializeResult, ListToolsResult,
    ServerCapabilities, ServerInfo, ToolDescription,
};
use crate::protocol::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_VERSION};
use crate::tools::{self, ToolContext};

/// MCP server
pub struct McpServer {
    ctx: ToolContext,
    initialized: bool,
}

impl McpServer {
    pub fn new(ctx: ToolContext) -> Self {
        Self {
            ctx,
            initialized: false,
        }
    }

    /// Handle one JSON-RPC request; notifications return `None`
    pub async fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!("handling request: {}", request.method);

        if !self.initialized
            && request.method != "initialize"
            && request.method != "notifications/initialized"
        {
            warn!("rejecting '{}': server not initialized", request.method);
            return Some(JsonRpcResponse::error(
                request.id,
                JsonRpcError::server_not_initialized(),
            ));
        }

        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params),
            "notifications/initialized" => return None,
            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tools_call(request.params).await,
            "ping" => Ok(serde_json::json!({})),
            method => Err(JsonRpcError::method_not_found(method)),
        };

        Some(match result {
            Ok(result) => JsonRpcResponse::success(request.id, result),
            Err(error) => JsonRpcResponse::error(request.id, error),
        })
    }

    fn handle_initialize(&mut self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let request: InitializeRequest = match params {
            Some(p) => serde_json::from_value(p)
                .map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?,
            None => InitializeRequest::default(),
        };

        // Use the client's version when it is older than ours
        let negotiated = if request.protocol_version.as_str() < MCP_VERSION {
            info!(
                "client requested older protocol version {}, using it",
                request.protocol_version
            );
            request.protocol_version.clone()
        } else {
            MCP_VERSION.to_string()
        };

        self.initialized = true;
        info!("MCP session initialized with protocol version {negotiated}");

        let result = InitializeResult {
            protocol_version: negotiated,
            server_info: ServerInfo {
                name: "mnema".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            capabilities: ServerCapabilities {
                tools: Some({
                    let mut map = HashMap::new();
                    map.insert("listChanged".to_string(), serde_json::json!(false));
                    map
                }),
            },
            instructions: Some(
                "Mnema is the project's long-term memory. Call memory_context at the start of a \
                 task to pull relevant prior work, memory_save after decisions or discoveries, and \
                 task_preflight/task_postflight around each task to track what was learned. \
                 Near-duplicate saves reinforce existing memories instead of creating new ones."
                    .to_string(),
            ),
        };
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    fn handle_tools_list(&self) -> Result<Value, JsonRpcError> {
        let describe = |name: &str, description: &str, schema: Value| ToolDescription {
            name: name.to_string(),
            description: Some(description.to_string()),
            input_schema: schema,
        };

        let tools = vec![
            describe(
                "memory_search",
                "Search memories with hybrid vector + lexical retrieval (RRF fusion). Supports \
                 multi-concept intersection via 'concepts', anchor-span projection, and tier/folder \
                 filters. Returned memories are strengthened (testing effect).",
                tools::search::schema(),
            ),
            describe(
                "memory_match_triggers",
                "Fast whole-phrase trigger matching against the cached trigger map. No embedding \
                 call; ranks by importance weight.",
                tools::triggers::schema(),
            ),
            describe(
                "memory_save",
                "Save a memory through the prediction-error gate: duplicates reinforce, \
                 near-duplicates update (or supersede on contradiction), related content links.",
                tools::save::schema(),
            ),
            describe(
                "memory_update",
                "Update fields of an existing memory by id; changed content re-embeds.",
                tools::update::schema(),
            ),
            describe(
                "memory_delete",
                "Delete one memory by id, or a whole spec folder with confirm=true (auto-checkpoint \
                 taken first).",
                tools::delete::schema(),
            ),
            describe("memory_list", "List memories by folder and tier.", tools::list::schema()),
            describe(
                "memory_stats",
                "Store statistics: counts by tier/type/folder, embedding coverage, causal link \
                 coverage.",
                tools::stats::schema(),
            ),
            describe(
                "memory_health",
                "Health report: provider readiness, schema version, vector integrity (optionally \
                 auto-cleaning orphans).",
                tools::health::health_schema(),
            ),
            describe(
                "memory_validate",
                "Validate a memory file (front-matter, tier, anchors) without indexing it.",
                tools::health::validate_schema(),
            ),
            describe(
                "memory_index_scan",
                "Scan the memory roots and index changed files. Incremental (mtime + content hash \
                 fast path), bounded concurrency, 60s cooldown.",
                tools::index_scan::schema(),
            ),
            describe(
                "memory_context",
                "Intent-aware context retrieval. mode=auto classifies the prompt \
                 (add_feature/fix_bug/refactor/security_audit/understand) and routes with a \
                 mode-specific token budget. resume mode pins state/next-steps/summary/blockers \
                 anchors and disables decay. With sessionId, runs the working-memory turn pipeline.",
                tools::context::schema(),
            ),
            describe(
                "checkpoint_create",
                "Snapshot memories, vectors, causal edges, and working memory under a name.",
                tools::checkpoint::create_schema(),
            ),
            describe(
                "checkpoint_list",
                "List checkpoints, newest first.",
                tools::checkpoint::list_schema(),
            ),
            describe(
                "checkpoint_restore",
                "Restore a checkpoint; clearExisting=true replaces the scoped subset.",
                tools::checkpoint::restore_schema(),
            ),
            describe(
                "checkpoint_delete",
                "Delete a checkpoint by name.",
                tools::checkpoint::delete_schema(),
            ),
            describe(
                "task_preflight",
                "Record knowledge/uncertainty/context scores (0-100) before starting a task.",
                tools::task::preflight_schema(),
            ),
            describe(
                "task_postflight",
                "Record post-task scores; computes deltas and the weighted learning index.",
                tools::task::postflight_schema(),
            ),
            describe(
                "memory_get_learning_history",
                "Learning records with optional aggregate stats.",
                tools::task::history_schema(),
            ),
            describe(
                "memory_causal_link",
                "Create a typed causal edge between two memories.",
                tools::causal::link_schema(),
            ),
            describe(
                "memory_causal_unlink",
                "Remove a causal edge by id.",
                tools::causal::unlink_schema(),
            ),
            describe(
                "memory_causal_stats",
                "Causal graph statistics: edge counts per relation, link coverage.",
                tools::causal::stats_schema(),
            ),
            describe(
                "memory_drift_why",
                "Explain a memory via bounded BFS over its causal chain.",
                tools::causal::drift_why_schema(),
            ),
        ];

        serde_json::to_value(ListToolsResult { tools })
            .map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    async fn handle_tools_call(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let request: CallToolRequest = match params {
            Some(p) => serde_json::from_value(p)
                .map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?,
            None => return Err(JsonRpcError::invalid_params("missing tool call params")),
        };

        // An external writer may have committed since the last call
        if let Err(e) = self.ctx.storage.check_external_update() {
            warn!("sentinel check failed: {e}");
        }

        let envelope = self.dispatch(&request.name, request.arguments).await?;
        serde_json::to_value(CallToolResult::from_envelope(&envelope))
            .map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    /// Route a tool call by name, wrapping the outcome in the envelope
    pub async fn dispatch(&self, name: &str, args: Option<Value>) -> Result<Envelope, JsonRpcError> {
        let ctx = &self.ctx;
        let envelope = match name {
            "memory_search" => run_tool(name, tools::search::execute(ctx, args)).await,
            "memory_match_triggers" => run_tool(name, tools::triggers::execute(ctx, args)).await,
            "memory_save" => run_tool(name, tools::save::execute(ctx, args)).await,
            "memory_update" => run_tool(name, tools::update::execute(ctx, args)).await,
            "memory_delete" => run_tool(name, tools::delete::execute(ctx, args)).await,
            "memory_list" => run_tool(name, tools::list::execute(ctx, args)).await,
            "memory_stats" => run_tool(name, tools::stats::execute(ctx, args)).await,
            "memory_health" => run_tool(name, tools::health::execute_health(ctx, args)).await,
            "memory_validate" => run_tool(name, tools::health::execute_validate(ctx, args)).await,
            "memory_index_scan" => run_tool(name, tools::index_scan::execute(ctx, args)).await,
            "memory_context" => run_tool(name, tools::context::execute(ctx, args)).await,
            "checkpoint_create" => run_tool(name, tools::checkpoint::execute_create(ctx, args)).await,
            "checkpoint_list" => run_tool(name, tools::checkpoint::execute_list(ctx, args)).await,
            "checkpoint_restore" => {
                run_tool(name, tools::checkpoint::execute_restore(ctx, args)).await
            }
            "checkpoint_delete" => run_tool(name, tools::checkpoint::execute_delete(ctx, args)).await,
            "task_preflight" => run_tool(name, tools::task::execute_preflight(ctx, args)).await,
            "task_postflight" => run_tool(name, tools::task::execute_postflight(ctx, args)).await,
            "memory_get_learning_history" => {
                run_tool(name, tools::task::execute_history(ctx, args)).await
            }
            "memory_causal_link" => run_tool(name, tools::causal::execute_link(ctx, args)).await,
            "memory_causal_unlink" => run_tool(name, tools::causal::execute_unlink(ctx, args)).await,
            "memory_causal_stats" => run_tool(name, tools::causal::execute_stats(ctx, args)).await,
            "memory_drift_why" => run_tool(name, tools::causal::execute_drift_why(ctx, args)).await,
            other => return Err(JsonRpcError::method_not_found(other)),
        };
        Ok(envelope)
    }
}

// ============================================================================
// TESTS
// ============================================================================
