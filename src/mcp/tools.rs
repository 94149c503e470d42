//! MCP tool definitions and dispatch for the context service.
//!
//! Each tool maps to a `ContextService` operation. Operation failures (not
//! ready, not found, setup rejections) come back as tool results flagged
//! with `isError` and a stable error code; malformed calls are protocol
//! errors.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::{ContextError, Result};
use crate::service::ContextService;

/// Maximum character length for a tool response text before truncation.
const MAX_RESPONSE_CHARS: usize = 100_000;

/// A tool definition exposed by the MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's input parameters.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

fn no_args() -> Value {
    json!({ "type": "object", "properties": {} })
}

fn name_arg(what: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": {
                "type": "string",
                "description": format!("Name of the {} to look up (first match wins)", what)
            }
        },
        "required": ["name"]
    })
}

fn tool(name: &str, description: &str, input_schema: Value) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
    }
}

/// Returns the list of all tool definitions exposed by this MCP server.
pub fn get_tool_definitions() -> Vec<ToolDefinition> {
    vec![
        tool(
            "setup_context",
            "Run Ghidra headless analysis on a binary and load the exported context. Replaces any previously loaded context on success.",
            json!({
                "type": "object",
                "properties": {
                    "engine_path": {
                        "type": "string",
                        "description": "Ghidra installation directory (defaults to the configured path)"
                    },
                    "binary_path": {
                        "type": "string",
                        "description": "Binary to analyze (defaults to the configured path)"
                    }
                }
            }),
        ),
        tool(
            "list_functions",
            "List all function names from the loaded binary, in listing order.",
            no_args(),
        ),
        tool(
            "get_pseudocode",
            "Get decompiled pseudocode for a function by name.",
            name_arg("function"),
        ),
        tool(
            "get_function",
            "Get the full record of a function: signature, parameters, locals, referenced globals, strings and comments.",
            name_arg("function"),
        ),
        tool(
            "list_structures",
            "List all structure type names.",
            no_args(),
        ),
        tool(
            "get_structure",
            "Get a structure's length and members by name.",
            name_arg("structure"),
        ),
        tool("list_enums", "List all enum type names.", no_args()),
        tool(
            "get_enum",
            "Get an enum's length and values by name.",
            name_arg("enum"),
        ),
        tool(
            "list_function_definitions",
            "List all function definition (signature) type names.",
            no_args(),
        ),
        tool(
            "get_function_definition",
            "Get a function definition's return type and parameters by name.",
            name_arg("function definition"),
        ),
        tool(
            "context_status",
            "Report whether a context is loaded, for which binary, and entity counts.",
            no_args(),
        ),
    ]
}

/// Dispatches a tool call to the appropriate handler.
///
/// Returns `Err` only for protocol errors (unknown tool, bad arguments).
/// `server_stats` is merged into the `context_status` output.
pub fn handle_tool_call(
    service: &ContextService,
    tool_name: &str,
    args: Value,
    server_stats: Option<Value>,
) -> Result<Value> {
    let outcome = match tool_name {
        "setup_context" => handle_setup(service, &args),
        "list_functions" => service.list_functions().map(names_result),
        "get_pseudocode" => handle_pseudocode(service, &args),
        "get_function" => {
            let name = required_str(&args, "name")?;
            service.get_function(name).and_then(record_result)
        }
        "list_structures" => service.list_structures().map(names_result),
        "get_structure" => {
            let name = required_str(&args, "name")?;
            service.get_structure(name).and_then(record_result)
        }
        "list_enums" => service.list_enums().map(names_result),
        "get_enum" => {
            let name = required_str(&args, "name")?;
            service.get_enum(name).and_then(record_result)
        }
        "list_function_definitions" => service.list_function_definitions().map(names_result),
        "get_function_definition" => {
            let name = required_str(&args, "name")?;
            service.get_function_definition(name).and_then(record_result)
        }
        "context_status" => handle_status(service, server_stats),
        _ => return Err(ContextError::UnknownTool(tool_name.to_string())),
    };

    match outcome {
        Ok(result) => Ok(result),
        Err(e) if e.is_protocol_error() => Err(e),
        Err(e) => Ok(error_result(&e)),
    }
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ContextError::InvalidArgument {
            message: format!("missing required parameter: {}", key),
        })
}

/// Reads an optional path argument, falling back to a configured default.
fn path_arg(args: &Value, key: &str, fallback: Option<&PathBuf>) -> Result<PathBuf> {
    match args.get(key).and_then(|v| v.as_str()) {
        Some(p) => Ok(PathBuf::from(p)),
        None => fallback.cloned().ok_or_else(|| ContextError::InvalidArgument {
            message: format!("missing required parameter: {} (no default configured)", key),
        }),
    }
}

/// Truncates a string to the maximum response character limit, appending
/// a truncation notice if necessary.
fn truncate_response(s: &str) -> String {
    if s.len() <= MAX_RESPONSE_CHARS {
        s.to_string()
    } else {
        let mut end = MAX_RESPONSE_CHARS;
        while !s.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        format!("{}\n\n[... truncated at {} chars]", &s[..end], end)
    }
}

fn text_result(text: &str, structured: Value) -> Value {
    json!({
        "content": [{ "type": "text", "text": truncate_response(text) }],
        "structuredContent": structured,
        "isError": false
    })
}

fn names_result(names: Vec<String>) -> Value {
    let text = serde_json::to_string_pretty(&names).unwrap_or_default();
    text_result(&text, json!({ "names": names }))
}

fn record_result<T: Serialize>(record: T) -> Result<Value> {
    let value = serde_json::to_value(record)?;
    let text = serde_json::to_string_pretty(&value)?;
    Ok(text_result(&text, value))
}

/// A tool result describing a failed operation.
pub fn error_result(err: &ContextError) -> Value {
    let message = err.to_string();
    json!({
        "content": [{ "type": "text", "text": truncate_response(&message) }],
        "structuredContent": { "error": err.code(), "message": message },
        "isError": true
    })
}

fn handle_setup(service: &ContextService, args: &Value) -> Result<Value> {
    let config = service.config();
    let engine_path = path_arg(args, "engine_path", config.default_engine_path.as_ref())?;
    let binary_path = path_arg(args, "binary_path", config.default_binary_path.as_ref())?;

    let summary = service.setup(&engine_path, &binary_path)?;
    let text = format!(
        "Context loaded for '{}' ({} functions, {} structures, {} enums, {} function definitions).",
        summary.binary_name,
        summary.stats.function_count,
        summary.stats.structure_count,
        summary.stats.enum_count,
        summary.stats.function_definition_count
    );
    Ok(text_result(&text, serde_json::to_value(&summary)?))
}

fn handle_pseudocode(service: &ContextService, args: &Value) -> Result<Value> {
    let name = required_str(args, "name")?;
    let pseudocode = service.get_pseudocode(name)?;
    Ok(text_result(
        &pseudocode,
        json!({ "name": name, "pseudocode": pseudocode }),
    ))
}

fn handle_status(service: &ContextService, server_stats: Option<Value>) -> Result<Value> {
    let mut status = serde_json::to_value(service.status())?;
    if let (Some(stats), Some(obj)) = (server_stats, status.as_object_mut()) {
        obj.insert("server".to_string(), stats);
    }
    let text = serde_json::to_string_pretty(&status)?;
    Ok(text_result(&text, status))
}
