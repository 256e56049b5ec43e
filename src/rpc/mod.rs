//! 4.H JSON-RPC dispatcher: a hand-rolled JSON-RPC 2.0 router over the
//! composite tool surface. Kept as plain `serde_json::Value` handling
//! rather than a macro-driven tool router, because the composite
//! `(tool, mode)` dispatch table doesn't fit a one-tool-per-function shape.

pub mod stdio;
pub mod tools;

use crate::errors::RuntimeError;
use crate::AppState;
use serde_json::{json, Value};
use std::sync::Arc;

const PROTOCOL_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "devconsoled";

const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_REQUEST: i64 = -32600;

/// `{content: [{type:"text", text}], isError?: bool}`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MCPToolResult {
    pub content: Vec<ContentItem>,
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ContentItem {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

impl MCPToolResult {
    pub fn ok(summary: &str, body: Option<Value>) -> Self {
        let text = match body {
            Some(body) => format!("{summary}\n{}", serde_json::to_string_pretty(&body).unwrap_or_default()),
            None => summary.to_string(),
        };
        Self {
            content: vec![ContentItem { kind: "text", text }],
            is_error: None,
        }
    }

    pub fn from_error(error: &RuntimeError) -> Self {
        let tool_error = error.to_tool_error();
        Self {
            content: vec![ContentItem {
                kind: "text",
                text: serde_json::to_string_pretty(&tool_error).unwrap_or_default(),
            }],
            is_error: Some(true),
        }
    }
}

fn success_response(id: Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

fn error_response(id: Value, code: i64, message: String) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
}

/// Tool names that legitimately exist in the composite surface.
const TOOL_NAMES: &[&str] = &[
    "observe",
    "analyze",
    "generate",
    "configure",
    "query_dom",
    "generate_csp",
    "security_audit",
    "get_audit_log",
    "diff_sessions",
];

fn tool_schema(state: &AppState) -> Value {
    let data_counts = json!({
        "logs": state.logs.len(),
        "network": state.capture.health().network_bodies,
        "websocket_events": state.capture.health().ws_events,
        "actions": state.capture.health().actions,
    });
    json!([
        {
            "name": "observe",
            "description": "Read captured browser telemetry by mode.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "what": {"type": "string", "enum": tools::OBSERVE_MODES},
                },
                "required": ["what"],
            },
            "_meta": {"data_counts": data_counts},
        },
        {
            "name": "analyze",
            "description": "Derive an analysis over captured telemetry.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "target": {"type": "string", "enum": tools::ANALYZE_TARGETS},
                },
                "required": ["target"],
            },
            "_meta": {"data_counts": data_counts},
        },
        {
            "name": "generate",
            "description": "Produce a derived artifact (script, report, export).",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "format": {"type": "string", "enum": tools::GENERATE_FORMATS},
                },
                "required": ["format"],
            },
            "_meta": {"data_counts": data_counts},
        },
        {
            "name": "configure",
            "description": "Mutate backend state: sessions, noise rules, saved sequences.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "action": {"type": "string", "enum": tools::CONFIGURE_ACTIONS},
                },
                "required": ["action"],
            },
        },
        {
            "name": "query_dom",
            "description": "Suspend until the extension answers a DOM query.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "selector": {"type": "string"},
                    "timeout_ms": {"type": "integer"},
                    "tab_id": {"type": "string"},
                },
                "required": ["selector"],
            },
        },
        {"name": "generate_csp", "description": "Recommend a Content-Security-Policy from observed origins.", "inputSchema": {"type": "object", "properties": {}}},
        {"name": "security_audit", "description": "Scan captured telemetry for common security smells.", "inputSchema": {"type": "object", "properties": {}}},
        {"name": "get_audit_log", "description": "Return the merged chronological timeline.", "inputSchema": {"type": "object", "properties": {}}},
        {"name": "diff_sessions", "description": "Diff captured state against a checkpoint.", "inputSchema": {"type": "object", "properties": {"checkpoint": {"type": "string"}}}},
    ])
}

pub async fn handle_request(state: &Arc<AppState>, request: Value) -> Value {
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let Some(method) = request.get("method").and_then(Value::as_str) else {
        return error_response(id, INVALID_REQUEST, "missing method".into());
    };

    match method {
        "initialize" => success_response(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": {"name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION")},
                "capabilities": {"tools": {}},
            }),
        ),
        "initialized" => success_response(id, json!({})),
        "tools/list" => success_response(id, json!({"tools": tool_schema(state)})),
        "tools/call" => {
            let params = request.get("params").cloned().unwrap_or(Value::Null);
            let Some(name) = params.get("name").and_then(Value::as_str) else {
                return error_response(id, INVALID_REQUEST, "missing tool name".into());
            };
            if !TOOL_NAMES.contains(&name) {
                return error_response(id, METHOD_NOT_FOUND, format!("unknown tool `{name}`"));
            }
            let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
            let result = tools::call_tool(state, name, &args).await;
            success_response(id, serde_json::to_value(result).unwrap_or(Value::Null))
        }
        other => error_response(id, METHOD_NOT_FOUND, format!("unknown method `{other}`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn state() -> Arc<AppState> {
        let mut cfg = Config::default();
        cfg.storage.data_dir = tempfile::tempdir().unwrap().into_path();
        cfg.storage.log_file = cfg.storage.data_dir.join("console.ndjson");
        AppState::new(cfg)
    }

    #[tokio::test]
    async fn initialize_reports_fixed_protocol_version() {
        let state = state();
        let response = handle_request(&state, json!({"jsonrpc":"2.0","id":1,"method":"initialize"})).await;
        assert_eq!(response["result"]["protocolVersion"], json!(PROTOCOL_VERSION));
    }

    #[tokio::test]
    async fn tools_list_returns_exactly_the_composite_surface() {
        let state = state();
        let response = handle_request(&state, json!({"jsonrpc":"2.0","id":1,"method":"tools/list"})).await;
        let names: Vec<String> = response["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect();
        for expected in TOOL_NAMES {
            assert!(names.contains(&expected.to_string()));
        }
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let state = state();
        let response = handle_request(&state, json!({"jsonrpc":"2.0","id":1,"method":"nope"})).await;
        assert_eq!(response["error"]["code"], json!(METHOD_NOT_FOUND));
    }

    #[tokio::test]
    async fn legacy_tool_name_is_method_not_found() {
        let state = state();
        let response = handle_request(
            &state,
            json!({"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"get_browser_errors","arguments":{}}}),
        )
        .await;
        assert_eq!(response["error"]["code"], json!(METHOD_NOT_FOUND));
    }

    #[tokio::test]
    async fn missing_mode_is_a_semantic_error_not_a_protocol_error() {
        let state = state();
        let response = handle_request(
            &state,
            json!({"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"observe","arguments":{}}}),
        )
        .await;
        assert!(response.get("error").is_none());
        assert_eq!(response["result"]["isError"], json!(true));
    }

    #[tokio::test]
    async fn unknown_mode_is_a_semantic_error() {
        let state = state();
        let response = handle_request(
            &state,
            json!({"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"observe","arguments":{"what":"bogus"}}}),
        )
        .await;
        assert_eq!(response["result"]["isError"], json!(true));
    }

    #[tokio::test]
    async fn valid_observe_network_mode_dispatches() {
        let state = state();
        state.capture.add_network_bodies(vec![crate::types::NetworkBody {
            method: "GET".into(),
            url: "https://x/api/users".into(),
            status: Some(200),
            ..Default::default()
        }]);
        let response = handle_request(
            &state,
            json!({"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"observe","arguments":{"what":"network"}}}),
        )
        .await;
        assert!(response.get("error").is_none());
        assert!(response["result"]["isError"].is_null());
    }
}
