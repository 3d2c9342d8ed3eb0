//! Uniform tool response envelope
//!
//! Every tool answers with the same shape, machine-consumable first:
//!
//! ```json
//! {
//!   "meta": { "tool": "...", "started_at": "...", "duration_ms": 3, "version": "..." },
//!   "summary": "one human line",
//!   "data": { ... },
//!   "hints": ["..."],
//!   "error": { "code": "...", "message": "...", "recovery": { "hint": "...", "actions": [...], "severity": "..." } }
//! }
//! ```
//!
//! Error codes are stable strings; every error carries recovery
//! actions a caller can execute without a human.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use mnema_core::{EmbeddingError, StorageError};

// ============================================================================
// ERROR TAXONOMY
// ============================================================================

/// Stable error code strings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MissingRequiredParam,
    InvalidParameter,
    NotFound,
    RateLimited,
    EmbeddingFailed,
    DimensionMismatch,
    DatabaseError,
    Unavailable,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MissingRequiredParam => "MISSING_REQUIRED_PARAM",
            ErrorCode::InvalidParameter => "INVALID_PARAMETER",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::EmbeddingFailed => "EMBEDDING_FAILED",
            ErrorCode::DimensionMismatch => "DIMENSION_MISMATCH",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::Unavailable => "UNAVAILABLE",
            ErrorCode::Internal => "INTERNAL",
        }
    }

    fn default_severity(&self) -> &'static str {
        match self {
            ErrorCode::MissingRequiredParam | ErrorCode::InvalidParameter => "warning",
            ErrorCode::NotFound | ErrorCode::RateLimited => "info",
            ErrorCode::EmbeddingFailed | ErrorCode::Unavailable => "warning",
            ErrorCode::DimensionMismatch | ErrorCode::DatabaseError | ErrorCode::Internal => {
                "error"
            }
        }
    }
}

/// Machine-usable recovery guidance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recovery {
    pub hint: String,
    pub actions: Vec<String>,
    pub severity: String,
}

/// A tool-level error carried inside the envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub recovery: Recovery,
}

impl ToolError {
    pub fn new(code: ErrorCode, message: impl Into<String>, hint: impl Into<String>, actions: Vec<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            recovery: Recovery {
                hint: hint.into(),
                actions,
                severity: code.default_severity().to_string(),
            },
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn missing_param(name: &str) -> Self {
        Self::new(
            ErrorCode::MissingRequiredParam,
            format!("missing required parameter: {name}"),
            format!("supply '{name}' and retry"),
            vec![format!("add the '{name}' argument to the call")],
        )
    }

    pub fn invalid_param(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(
            ErrorCode::InvalidParameter,
            message.clone(),
            "fix the argument and retry",
            vec![format!("correct the invalid argument: {message}")],
        )
    }

    pub fn invalid_args(e: &serde_json::Error) -> Self {
        Self::invalid_param(format!("invalid arguments: {e}"))
    }
}

impl From<StorageError> for ToolError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::RateLimited { wait_seconds } => Self::new(
                ErrorCode::RateLimited,
                format!("rate limited: retry in {wait_seconds}s"),
                "the index-scan cooldown has not elapsed",
                vec![
                    format!("wait {wait_seconds} seconds"),
                    "retry memory_index_scan after the cooldown".to_string(),
                ],
            )
            .with_details(serde_json::json!({ "wait_seconds": wait_seconds })),
            StorageError::DimensionMismatch { expected, got } => Self::new(
                ErrorCode::DimensionMismatch,
                format!("embedding dimension mismatch: store has {expected}, got {got}"),
                "the store was built with a different embedding profile",
                vec![
                    "reconcile the embedding profile with the store".to_string(),
                    "or rebuild the store with memory_index_scan force=true against the new profile".to_string(),
                ],
            ),
            StorageError::NotFound(what) => Self::new(
                ErrorCode::NotFound,
                format!("not found: {what}"),
                "the referenced record does not exist",
                vec!["call memory_list to discover valid ids".to_string()],
            ),
            StorageError::Embedding(EmbeddingError::Unavailable(msg)) => Self::new(
                ErrorCode::Unavailable,
                format!("embedding provider unavailable: {msg}"),
                "the provider is not ready",
                vec![
                    "retry after the provider initializes".to_string(),
                    "or pass allowPartialUpdate=true to store the row pending".to_string(),
                ],
            ),
            StorageError::Embedding(e) => Self::new(
                ErrorCode::EmbeddingFailed,
                e.to_string(),
                "the embedding call failed for this input",
                vec![
                    "retry the operation".to_string(),
                    "or pass allowPartialUpdate=true to store the row pending".to_string(),
                ],
            ),
            StorageError::InvalidInput(msg) => Self::invalid_param(msg),
            StorageError::Parse(msg) => Self::new(
                ErrorCode::InvalidParameter,
                format!("memory file failed validation: {msg}"),
                "fix the file and re-run",
                vec!["call memory_validate for the full error list".to_string()],
            ),
            StorageError::Database(e) => Self::new(
                ErrorCode::DatabaseError,
                format!("database error: {e}"),
                "the transaction rolled back",
                vec!["retry the operation".to_string()],
            ),
            StorageError::Io(e) => Self::new(
                ErrorCode::Internal,
                format!("io error: {e}"),
                "a filesystem operation failed",
                vec!["check the file path and permissions".to_string()],
            ),
            StorageError::Init(msg) | StorageError::Vector(mnema_core::search::VectorSearchError::IndexCreation(msg)) => Self::new(
                ErrorCode::Internal,
                msg,
                "unexpected internal failure",
                vec!["check the server logs".to_string()],
            ),
            StorageError::Vector(e) => Self::new(
                ErrorCode::Internal,
                e.to_string(),
                "the vector index rejected the operation",
                vec!["run memory_health to check index integrity".to_string()],
            ),
        }
    }
}

// ============================================================================
// ENVELOPE
// ============================================================================

/// Timing and identity metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeMeta {
    pub tool: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub version: String,
}

/// The uniform response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub meta: EnvelopeMeta,
    pub summary: String,
    pub data: Value,
    pub hints: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
}

/// Successful tool output, pre-envelope
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub summary: String,
    pub data: Value,
    pub hints: Vec<String>,
}

impl ToolOutput {
    pub fn new(summary: impl Into<String>, data: Value) -> Self {
        Self {
            summary: summary.into(),
            data,
            hints: Vec::new(),
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hints.push(hint.into());
        self
    }
}

/// Every tool returns this
pub type ToolResult = Result<ToolOutput, ToolError>;

/// Run a tool body and wrap the outcome in an envelope with timing
pub async fn run_tool<F>(tool: &str, fut: F) -> Envelope
where
    F: std::future::Future<Output = ToolResult>,
{
    let started_at = Utc::now();
    let start = std::time::Instant::now();
    let outcome = fut.await;
    let duration_ms = start.elapsed().as_millis() as u64;

    let meta = EnvelopeMeta {
        tool: tool.to_string(),
        started_at,
        duration_ms,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    match outcome {
        Ok(output) => {
            tracing::debug!(tool, duration_ms, "tool completed");
            Envelope {
                meta,
                summary: output.summary,
                data: output.data,
                hints: output.hints,
                error: None,
            }
        }
        Err(error) => {
            tracing::warn!(tool, code = error.code.as_str(), "tool failed: {}", error.message);
            Envelope {
                meta,
                summary: format!("{tool} failed: {}", error.message),
                data: Value::Null,
                hints: Vec::new(),
                error: Some(error),
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn success_envelope_shape() {
        let envelope = run_tool("memory_stats", async {
            Ok(ToolOutput::new("2 memories", serde_json::json!({"total": 2})))
        })
        .await;

        assert!(envelope.error.is_none());
        assert_eq!(envelope.meta.tool, "memory_stats");
        assert_eq!(envelope.summary, "2 memories");

        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json["meta"]["started_at"].is_string());
        assert!(json["meta"]["duration_ms"].is_number());
        assert_eq!(json["data"]["total"], 2);
    }

    #[tokio::test]
    async fn error_envelope_has_recovery() {
        let envelope = run_tool("memory_index_scan", async {
            Err(ToolError::from(StorageError::RateLimited { wait_seconds: 42 }))
        })
        .await;

        let error = envelope.error.unwrap();
        assert_eq!(error.code, ErrorCode::RateLimited);
        assert_eq!(error.details.unwrap()["wait_seconds"], 42);
        assert!(error.recovery.actions.iter().any(|a| a.contains("42 seconds")));

        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["code"], "RATE_LIMITED");
    }

    #[test]
    fn error_codes_are_stable_strings() {
        assert_eq!(
            serde_json::to_value(ErrorCode::MissingRequiredParam).unwrap(),
            "MISSING_REQUIRED_PARAM"
        );
        assert_eq!(
            serde_json::to_value(ErrorCode::DimensionMismatch).unwrap(),
            "DIMENSION_MISMATCH"
        );
        for code in [
            ErrorCode::MissingRequiredParam,
            ErrorCode::InvalidParameter,
            ErrorCode::NotFound,
            ErrorCode::RateLimited,
            ErrorCode::EmbeddingFailed,
            ErrorCode::DimensionMismatch,
            ErrorCode::DatabaseError,
            ErrorCode::Unavailable,
            ErrorCode::Internal,
        ] {
            assert_eq!(serde_json::to_value(code).unwrap(), code.as_str());
        }
    }

    #[test]
    fn storage_error_mapping() {
        let err = ToolError::from(StorageError::NotFound("memory 7".to_string()));
        assert_eq!(err.code, ErrorCode::NotFound);

        let err = ToolError::from(StorageError::DimensionMismatch { expected: 768, got: 256 });
        assert_eq!(err.code, ErrorCode::DimensionMismatch);

        let err = ToolError::from(StorageError::InvalidInput("bad tier".to_string()));
        assert_eq!(err.code, ErrorCode::InvalidParameter);
    }
}
