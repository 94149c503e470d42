//! MCP server that reads JSON-RPC 2.0 messages from stdin and writes
//! responses to stdout.
//!
//! Requests are handled one at a time in arrival order, so a running
//! `setup_context` holds back later requests until it finishes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::errors::Result;
use crate::service::ContextService;

use super::tools::{get_tool_definitions, handle_tool_call};
use super::transport::{ErrorCode, JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION};

/// Runtime statistics for the MCP server.
struct ServerStats {
    started_at: Instant,
    total_requests: AtomicU64,
    tool_calls: AtomicU64,
    errors: AtomicU64,
}

impl ServerStats {
    fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_requests: AtomicU64::new(0),
            tool_calls: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }
}

/// The MCP server wrapping a `ContextService`.
pub struct McpServer {
    service: ContextService,
    stats: ServerStats,
    tool_call_counts: Mutex<HashMap<String, u64>>,
}

impl McpServer {
    pub fn new(service: ContextService) -> Self {
        Self {
            service,
            stats: ServerStats::new(),
            tool_call_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the wrapped service.
    pub fn service(&self) -> &ContextService {
        &self.service
    }

    /// Runs the server until stdin is closed.
    pub async fn run(&self) -> Result<()> {
        let stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let mut lines = BufReader::new(stdin).lines();

        tracing::info!("MCP server listening on stdio");

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            // Tool calls may block on the engine subprocess.
            let response = tokio::task::block_in_place(|| self.handle_message(line));

            if let Some(resp) = response {
                let json_line = match serde_json::to_string(&resp) {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::error!("failed to serialize response: {}", e);
                        continue;
                    }
                };
                stdout.write_all(format!("{}\n", json_line).as_bytes()).await?;
                stdout.flush().await?;
            }
        }

        tracing::info!("stdin closed; MCP server exiting");
        Ok(())
    }

    /// Parses one line from the client and handles it.
    ///
    /// Malformed JSON is a parse error. Well-formed JSON that is not a
    /// request object is an invalid request.
    pub fn handle_message(&self, line: &str) -> Option<JsonRpcResponse> {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                return Some(JsonRpcResponse::error(
                    Value::Null,
                    ErrorCode::ParseError,
                    format!("failed to parse JSON-RPC message: {}", e),
                ));
            }
        };
        let id = value.get("id").cloned().unwrap_or(Value::Null);
        match serde_json::from_value::<JsonRpcRequest>(value) {
            Ok(request) => self.handle_request(&request),
            Err(e) => Some(JsonRpcResponse::error(
                id,
                ErrorCode::InvalidRequest,
                format!("invalid JSON-RPC request: {}", e),
            )),
        }
    }

    /// Dispatches a parsed JSON-RPC request to the appropriate handler.
    ///
    /// Returns `None` for notifications, whatever their method.
    pub fn handle_request(&self, request: &JsonRpcRequest) -> Option<JsonRpcResponse> {
        self.stats.total_requests.fetch_add(1, Ordering::Relaxed);

        if request.is_notification() {
            tracing::debug!("notification {}", request.method);
            return None;
        }

        let id = request.id.clone();
        let result = if request.jsonrpc != JSONRPC_VERSION {
            JsonRpcResponse::error(
                id,
                ErrorCode::InvalidRequest,
                format!("unsupported jsonrpc version '{}'", request.jsonrpc),
            )
        } else {
            match request.method.as_str() {
                "initialize" => self.handle_initialize(id),
                "tools/list" => {
                    JsonRpcResponse::success(id, json!({ "tools": get_tool_definitions() }))
                }
                "tools/call" => self.handle_tools_call(id, &request.params),
                "ping" => JsonRpcResponse::success(id, json!({})),
                _ => JsonRpcResponse::error(
                    id,
                    ErrorCode::MethodNotFound,
                    format!("method not found: {}", request.method),
                ),
            }
        };

        let tool_failed = result
            .result
            .as_ref()
            .and_then(|r| r.get("isError"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if result.error.is_some() || tool_failed {
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
        }

        Some(result)
    }

    fn handle_initialize(&self, id: Value) -> JsonRpcResponse {
        JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {
                    "tools": {}
                },
                "serverInfo": {
                    "name": "ghidra",
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        )
    }

    fn handle_tools_call(&self, id: Value, params: &Option<Value>) -> JsonRpcResponse {
        let params = match params {
            Some(p) => p,
            None => {
                return JsonRpcResponse::error(
                    id,
                    ErrorCode::InvalidParams,
                    "missing params for tools/call".to_string(),
                );
            }
        };

        let tool_name = match params.get("name").and_then(|v| v.as_str()) {
            Some(name) => name,
            None => {
                return JsonRpcResponse::error(
                    id,
                    ErrorCode::InvalidParams,
                    "missing 'name' in tools/call params".to_string(),
                );
            }
        };

        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

        self.stats.tool_calls.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut counts) = self.tool_call_counts.lock() {
            *counts.entry(tool_name.to_string()).or_insert(0) += 1;
        }
        tracing::debug!("tools/call {}", tool_name);

        let server_stats = if tool_name == "context_status" {
            Some(self.server_stats_json())
        } else {
            None
        };

        match handle_tool_call(&self.service, tool_name, arguments, server_stats) {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(e) => JsonRpcResponse::from_context_error(id, &e),
        }
    }

    /// Returns the current server runtime statistics as a JSON value.
    pub fn server_stats_json(&self) -> Value {
        let tool_counts: Value = self
            .tool_call_counts
            .lock()
            .map(|counts| json!(*counts))
            .unwrap_or(json!({}));

        json!({
            "uptime_secs": self.stats.started_at.elapsed().as_secs(),
            "total_requests": self.stats.total_requests.load(Ordering::Relaxed),
            "tool_calls": self.stats.tool_calls.load(Ordering::Relaxed),
            "errors": self.stats.errors.load(Ordering::Relaxed),
            "tool_call_counts": tool_counts,
        })
    }
}
