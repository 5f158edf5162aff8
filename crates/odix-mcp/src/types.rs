//! Protocol types for the MCP JSON-RPC server.

use odix_core::OdixError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// ── JSON-RPC Types ──────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request. The `jsonrpc` member is not checked.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// Absent for notifications (no response expected).
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response carrying either `result` or `error`.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

impl JsonRpcError {
    pub const PARSE_ERROR: i64 = -32700;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

impl JsonRpcResponse {
    pub(crate) fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub(crate) fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

// ── Tool Result Types ───────────────────────────────────────────────────────

/// MCP tool result: a single text block holding a JSON payload.
#[derive(Debug, Serialize)]
pub struct ToolResult {
    pub content: [TextBlock; 1],
    #[serde(rename = "isError")]
    pub is_error: bool,
}

#[derive(Debug, Serialize)]
pub struct TextBlock {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

impl ToolResult {
    fn text_block(text: String, is_error: bool) -> Self {
        Self {
            content: [TextBlock { kind: "text", text }],
            is_error,
        }
    }

    /// Pretty-printed JSON payload.
    pub(crate) fn json(value: &Value) -> Self {
        let text = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
        Self::text_block(text, false)
    }

    /// Structured `{error, message}` payload flagged as an error.
    pub(crate) fn failure(err: &OdixError) -> Self {
        let body = json!({
            "error": err.code(),
            "message": err.to_string(),
        });
        Self::text_block(body.to_string(), true)
    }
}
