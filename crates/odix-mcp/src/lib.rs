//! odix-mcp: MCP server for the odix index (JSON-RPC 2.0 over stdio).
//!
//! Implements 9 tools: search_odoo_index, get_item_details, list_modules,
//! get_module_stats, find_references, search_by_attribute, search_xml_id,
//! update_index, get_index_status.
//!
//! Transport: Newline-delimited JSON-RPC messages over stdio.
//! All logging goes to stderr; stdout is reserved for JSON-RPC only.

use odix_index::RunCoordinator;
use odix_storage::Storage;
use serde_json::{json, Value};
use std::io::{self, BufRead, Write};
use std::sync::Arc;

pub mod query;
mod tools;
pub mod types;

pub use query::QueryService;
pub use types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, ToolResult};

/// MCP server that reads JSON-RPC from stdin, writes responses to stdout.
///
/// Requests are handled one at a time on the calling thread; indexing runs
/// triggered through `update_index` execute on the coordinator's runtime.
pub struct McpServer {
    pub name: String,
    pub version: String,
    service: QueryService,
}

impl McpServer {
    pub fn new(storage: Arc<Storage>, coordinator: Arc<RunCoordinator>) -> Self {
        Self {
            name: "odix".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            service: QueryService::new(storage, coordinator),
        }
    }

    pub fn service(&self) -> &QueryService {
        &self.service
    }

    /// Run the MCP server. Reads newline-delimited JSON-RPC from stdin,
    /// writes responses to stdout. Blocks until stdin is closed.
    pub fn run(&self) -> io::Result<()> {
        let stdin = io::stdin();
        let stdout = io::stdout();
        let mut stdout = stdout.lock();

        for line in stdin.lock().lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let request: JsonRpcRequest = match serde_json::from_str(&line) {
                Ok(req) => req,
                Err(e) => {
                    let resp =
                        JsonRpcResponse::error(Value::Null, JsonRpcError::PARSE_ERROR, format!("Parse error: {e}"));
                    write_response(&mut stdout, &resp)?;
                    continue;
                }
            };

            // Notifications (no id) don't get a response
            let Some(id) = request.id else {
                self.handle_notification(&request.method);
                continue;
            };
            let response = self.handle_request(&request.method, request.params.as_ref(), id);
            write_response(&mut stdout, &response)?;
        }

        Ok(())
    }

    fn handle_notification(&self, method: &str) {
        match method {
            "notifications/initialized" => {
                tracing::info!("Client initialized, odix MCP server ready");
            }
            "notifications/cancelled" => {
                tracing::debug!("Request cancelled by client");
            }
            _ => {
                tracing::debug!("Unknown notification: {method}");
            }
        }
    }

    pub fn handle_request(&self, method: &str, params: Option<&Value>, id: Value) -> JsonRpcResponse {
        match method {
            "initialize" => self.handle_initialize(id),
            "tools/list" => JsonRpcResponse::success(id, json!({ "tools": tools::tool_definitions() })),
            "tools/call" => self.handle_tools_call(id, params),
            "ping" => JsonRpcResponse::success(id, json!({})),
            _ => JsonRpcResponse::error(id, JsonRpcError::METHOD_NOT_FOUND, format!("Method not found: {method}")),
        }
    }

    fn handle_initialize(&self, id: Value) -> JsonRpcResponse {
        JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {
                    "tools": { "listChanged": false }
                },
                "serverInfo": {
                    "name": self.name,
                    "version": self.version
                }
            }),
        )
    }

    fn handle_tools_call(&self, id: Value, params: Option<&Value>) -> JsonRpcResponse {
        let Some(params) = params else {
            return JsonRpcResponse::error(id, JsonRpcError::INVALID_PARAMS, "Missing params");
        };

        let tool_name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

        let result = self.dispatch_tool(tool_name, &arguments);

        match serde_json::to_value(result) {
            Ok(v) => JsonRpcResponse::success(id, v),
            Err(e) => JsonRpcResponse::error(id, JsonRpcError::INTERNAL_ERROR, format!("Serialization error: {e}")),
        }
    }

    // ── Tool Dispatch ───────────────────────────────────────────────────────

    fn dispatch_tool(&self, name: &str, args: &Value) -> ToolResult {
        let service = &self.service;
        let outcome = match name {
            "search_odoo_index" => service.search(args),
            "get_item_details" => service.item_details(args),
            "list_modules" => service.list_modules(args),
            "get_module_stats" => service.module_stats(args),
            "find_references" => service.find_references(args),
            "search_by_attribute" => service.search_by_attribute(args),
            "search_xml_id" => service.search_xml_id(args),
            "update_index" => service.update_index(args),
            "get_index_status" => service.index_status(),
            _ => {
                return ToolResult::failure(&odix_core::OdixError::Validation(format!(
                    "Unknown tool: {name}"
                )))
            }
        };
        match outcome {
            Ok(value) => ToolResult::json(&value),
            Err(err) => {
                tracing::debug!("Tool {name} failed: {err}");
                ToolResult::failure(&err)
            }
        }
    }
}

fn write_response(writer: &mut impl Write, response: &JsonRpcResponse) -> io::Result<()> {
    let json = serde_json::to_string(response)?;
    writeln!(writer, "{json}")?;
    writer.flush()
}

// ── Tests ───────────────────────────────────────────────────────────────────
