//! Leaf handlers for the composite JSON-RPC tool surface. Each composite
//! tool dispatches on its discriminator mode; leaf tools have none.

use super::MCPToolResult;
use crate::a11y::canonical_key;
use crate::capture::{NetworkFilter, WsFilter};
use crate::diff::{DiffInclude, SeverityFilter};
use crate::errors::{Result, RuntimeError};
use crate::sequence::{self, ReplayOptions, StepExecutor};
use crate::timeline::{build_timeline, generate_har, generate_reproduction_script, generate_test_script, TestScriptOptions};
use crate::types::{NetworkBody, WsDirection};
use crate::AppState;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const OBSERVE_MODES: &[&str] = &[
    "errors",
    "logs",
    "network",
    "websocket_events",
    "websocket_status",
    "actions",
    "vitals",
    "page",
    "tabs",
    "changes",
    "accessibility",
];

pub const ANALYZE_TARGETS: &[&str] = &["performance", "api", "accessibility", "changes", "timeline"];

pub const GENERATE_FORMATS: &[&str] = &["reproduction", "test", "pr_summary", "sarif", "har"];

pub const CONFIGURE_ACTIONS: &[&str] = &[
    "store",
    "load",
    "noise_rule",
    "dismiss",
    "clear",
    "query_dom",
    "save_sequence",
    "list_sequences",
    "get_sequence",
    "delete_sequence",
    "replay_sequence",
];

pub async fn call_tool(state: &Arc<AppState>, tool: &str, args: &Value) -> MCPToolResult {
    let outcome = match tool {
        "observe" => dispatch(args, "what", OBSERVE_MODES, |mode| observe(state, mode, args)).await,
        "analyze" => dispatch(args, "target", ANALYZE_TARGETS, |mode| analyze(state, mode, args)).await,
        "generate" => dispatch(args, "format", GENERATE_FORMATS, |mode| generate(state, mode, args)).await,
        "configure" => dispatch(args, "action", CONFIGURE_ACTIONS, |mode| configure(state, mode, args)).await,
        "query_dom" => query_dom(state, args).await,
        "generate_csp" => generate_csp(state).await,
        "security_audit" => security_audit(state).await,
        "get_audit_log" => get_audit_log(state).await,
        "diff_sessions" => diff_sessions(state, args).await,
        _ => Err(RuntimeError::Unknown { kind: "tool", name: tool.to_string() }),
    };
    match outcome {
        Ok((summary, body)) => MCPToolResult::ok(&summary, body),
        Err(e) => MCPToolResult::from_error(&e),
    }
}

type ToolOutcome = Result<(String, Option<Value>)>;

async fn dispatch<'a, F, Fut>(args: &'a Value, discriminator: &str, allowed: &[&str], handler: F) -> ToolOutcome
where
    F: FnOnce(&'a str) -> Fut,
    Fut: std::future::Future<Output = ToolOutcome>,
{
    let Some(mode) = args.get(discriminator).and_then(Value::as_str) else {
        return Err(RuntimeError::MissingParam(discriminator.to_string()));
    };
    if !allowed.contains(&mode) {
        return Err(RuntimeError::Unknown { kind: discriminator, name: mode.to_string() });
    }
    handler(mode).await
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

fn usize_arg(args: &Value, key: &str) -> Option<usize> {
    args.get(key).and_then(Value::as_u64).map(|v| v as usize)
}

// ---------------------------------------------------------------- observe

async fn observe(state: &Arc<AppState>, mode: &str, args: &Value) -> ToolOutcome {
    match mode {
        "errors" => {
            let all = state.logs.entries(None, None);
            let errors: Vec<_> = all.into_iter().filter(|e| e.level() == Some("error")).collect();
            Ok(("observed errors".into(), Some(json!(errors))))
        }
        "logs" => {
            let since = str_arg(args, "since").and_then(|s| {
                chrono::DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&chrono::Utc))
            });
            let entries = state.logs.entries(usize_arg(args, "limit"), since);
            Ok(("observed logs".into(), Some(json!(entries))))
        }
        "network" => {
            let filter = NetworkFilter {
                url_contains: str_arg(args, "url_contains").map(String::from),
                method: str_arg(args, "method").map(String::from),
                status_min: args.get("status_min").and_then(Value::as_u64).map(|v| v as u16),
                status_max: args.get("status_max").and_then(Value::as_u64).map(|v| v as u16),
                limit: usize_arg(args, "limit"),
            };
            let bodies = state.capture.get_network_bodies(&filter);
            Ok(("observed network bodies".into(), Some(json!(bodies))))
        }
        "websocket_events" => {
            let filter = WsFilter {
                connection_id: str_arg(args, "connection_id").map(String::from),
                direction: str_arg(args, "direction").and_then(|d| match d {
                    "incoming" => Some(WsDirection::Incoming),
                    "outgoing" => Some(WsDirection::Outgoing),
                    _ => None,
                }),
                limit: usize_arg(args, "limit"),
            };
            let events = state.capture.get_ws_events(&filter);
            Ok(("observed websocket events".into(), Some(json!(events))))
        }
        "websocket_status" => {
            let active = state.capture.active_connections();
            let closed = state.capture.closed_connections();
            Ok(("observed websocket status".into(), Some(json!({"active": active, "closed": closed}))))
        }
        "actions" => {
            let actions = state.capture.get_actions(usize_arg(args, "limit"));
            Ok(("observed actions".into(), Some(json!(actions))))
        }
        "vitals" => {
            let url = str_arg(args, "url").ok_or_else(|| RuntimeError::MissingParam("url".into()))?;
            match state.capture.performance_for(url) {
                Some((snapshot, baseline)) => Ok(("observed vitals".into(), Some(json!({"snapshot": snapshot, "baseline": baseline})))),
                None => Err(RuntimeError::NoData(format!("no performance snapshot recorded for `{url}`"))),
            }
        }
        "page" => match state.a11y.current_url() {
            Some(url) => Ok(("observed current page".into(), Some(json!({"url": url})))),
            None => Err(RuntimeError::NoData("no page navigation observed yet".into())),
        },
        "tabs" => {
            let tabs: std::collections::BTreeSet<String> = state
                .pending
                .pending()
                .into_iter()
                .filter_map(|q| q.tab_id)
                .collect();
            Ok(("observed known tabs".into(), Some(json!(tabs))))
        }
        "changes" => {
            let result = state.diff.diff(&state.capture, &state.logs, &DiffInclude::all(), SeverityFilter::All, str_arg(args, "checkpoint"))?;
            Ok(("observed changes since checkpoint".into(), Some(serde_json::to_value(result).unwrap())))
        }
        "accessibility" => {
            let scope = str_arg(args, "scope").unwrap_or("page");
            let tags: Vec<String> = args
                .get("tags")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                .unwrap_or_default();
            let key = canonical_key(scope, &tags);
            match state.a11y.get(&key) {
                Some(cached) => Ok(("observed cached accessibility result".into(), Some(cached))),
                None => Err(RuntimeError::NoData(format!("no cached accessibility result for `{key}`"))),
            }
        }
        other => Err(RuntimeError::Unknown { kind: "what", name: other.to_string() }),
    }
}

// ---------------------------------------------------------------- analyze

async fn analyze(state: &Arc<AppState>, target: &str, args: &Value) -> ToolOutcome {
    match target {
        "performance" => {
            let url = str_arg(args, "url").ok_or_else(|| RuntimeError::MissingParam("url".into()))?;
            match state.capture.performance_for(url) {
                Some((snapshot, baseline)) => {
                    let degraded = baseline.is_degraded(snapshot.timing.avg);
                    Ok(("performance analysis".into(), Some(json!({"snapshot": snapshot, "baseline": baseline, "degraded": degraded}))))
                }
                None => Err(RuntimeError::NoData(format!("no performance snapshot recorded for `{url}`"))),
            }
        }
        "api" => {
            let filter = crate::schema_store::SchemaFilter {
                method: str_arg(args, "method").map(String::from),
                path_contains: str_arg(args, "path_contains").map(String::from),
            };
            let schema = state.schema.build_schema(&filter);
            Ok(("inferred API schema".into(), Some(json!(schema))))
        }
        "accessibility" => run_accessibility_audit(state, args).await,
        "changes" => {
            let result = state.diff.diff(&state.capture, &state.logs, &DiffInclude::all(), SeverityFilter::All, str_arg(args, "checkpoint"))?;
            Ok(("analyzed changes since checkpoint".into(), Some(serde_json::to_value(result).unwrap())))
        }
        "timeline" => {
            let timeline = collect_timeline(state);
            Ok(("analyzed timeline".into(), Some(json!(timeline))))
        }
        other => Err(RuntimeError::Unknown { kind: "target", name: other.to_string() }),
    }
}

async fn run_accessibility_audit(state: &Arc<AppState>, args: &Value) -> ToolOutcome {
    let scope = str_arg(args, "scope").unwrap_or("page").to_string();
    let tags: Vec<String> = args
        .get("tags")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default();
    let force_refresh = args.get("force_refresh").and_then(Value::as_bool).unwrap_or(false);
    let key = canonical_key(&scope, &tags);

    if !force_refresh {
        if let Some(cached) = state.a11y.get(&key) {
            return Ok(("accessibility audit (cached)".into(), Some(cached)));
        }
    }

    let timeout = args
        .get("timeout_ms")
        .and_then(Value::as_u64)
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(10));
    let query = state.pending.create("a11y".into(), json!({"scope": scope, "tags": tags}), str_arg(args, "tab_id").map(String::from), Some(timeout));
    let result = state.pending.wait(query.id, timeout, Some(&key)).await?;
    state.a11y.put(key, result.clone());
    Ok(("accessibility audit (fresh)".into(), Some(result)))
}

fn collect_timeline(state: &AppState) -> Vec<crate::timeline::TimelineEntry> {
    let actions: Vec<_> = state.capture.actions_with_time().into_iter().map(|(_, a)| a).collect();
    let networks: Vec<_> = state.capture.network_bodies_with_time().into_iter().map(|(_, b)| b).collect();
    let logs: Vec<_> = state.logs.entries_with_time().into_iter().map(|(_, e)| e).collect();
    build_timeline(&actions, &networks, &logs)
}

// --------------------------------------------------------------- generate

async fn generate(state: &Arc<AppState>, format: &str, args: &Value) -> ToolOutcome {
    match format {
        "reproduction" => {
            let actions = state.capture.get_actions(None);
            let mut actions = actions;
            actions.reverse();
            let script = generate_reproduction_script(&actions, str_arg(args, "base_url"));
            Ok(("generated reproduction script".into(), Some(json!({"script": script}))))
        }
        "test" => {
            let timeline = collect_timeline(state);
            let options = TestScriptOptions {
                assert_network: args.get("assert_network").and_then(Value::as_bool).unwrap_or(true),
                assert_no_errors: args.get("assert_no_errors").and_then(Value::as_bool).unwrap_or(true),
                assert_response_shape: args.get("assert_response_shape").and_then(Value::as_bool).unwrap_or(false),
            };
            let script = generate_test_script(&timeline, &options);
            Ok(("generated test script".into(), Some(json!({"script": script}))))
        }
        "pr_summary" => {
            let result = state.diff.diff(&state.capture, &state.logs, &DiffInclude::all(), SeverityFilter::All, str_arg(args, "checkpoint"))?;
            Ok(("generated PR summary".into(), Some(json!({"summary": pr_summary_text(&result)}))))
        }
        "sarif" => {
            let findings = security_findings(state);
            Ok(("generated SARIF report".into(), Some(sarif_document(&findings))))
        }
        "har" => {
            let bodies: Vec<NetworkBody> = state.capture.network_bodies_with_time().into_iter().map(|(_, b)| b).collect();
            let save_to = str_arg(args, "save_to").map(std::path::Path::new);
            let har = generate_har(&bodies, save_to)?;
            Ok(("generated HAR export".into(), Some(json!({"har": har}))))
        }
        other => Err(RuntimeError::Unknown { kind: "format", name: other.to_string() }),
    }
}

fn pr_summary_text(result: &crate::diff::DiffResult) -> String {
    let mut lines = vec![format!("Severity: {:?}", result.severity)];
    if let Some(console) = &result.console {
        lines.push(format!("New console errors: {}", console.new_errors.len()));
        lines.push(format!("New console warnings: {}", console.new_warnings.len()));
    }
    if let Some(network) = &result.network {
        lines.push(format!("New endpoints: {}", network.new_endpoints.len()));
        lines.push(format!("Failures: {}", network.failures.len()));
        lines.push(format!("Degraded: {}", network.degraded.len()));
    }
    lines.join("\n")
}

// -------------------------------------------------------------- configure

async fn configure(state: &Arc<AppState>, action: &str, args: &Value) -> ToolOutcome {
    match action {
        "store" => {
            let namespace = str_arg(args, "namespace").ok_or_else(|| RuntimeError::MissingParam("namespace".into()))?;
            let key = str_arg(args, "key").ok_or_else(|| RuntimeError::MissingParam("key".into()))?;
            let value = args.get("value").cloned().unwrap_or(Value::Null);
            state.sessions.save(namespace, key, value).await?;
            Ok(("stored value".into(), None))
        }
        "load" => {
            let namespace = str_arg(args, "namespace").ok_or_else(|| RuntimeError::MissingParam("namespace".into()))?;
            let key = str_arg(args, "key").ok_or_else(|| RuntimeError::MissingParam("key".into()))?;
            match state.sessions.load(namespace, key).await? {
                Some(value) => Ok(("loaded value".into(), Some(value))),
                None => Err(RuntimeError::NoData(format!("no value stored for `{namespace}/{key}`"))),
            }
        }
        "noise_rule" => {
            let sub = str_arg(args, "sub_action").unwrap_or("list");
            match sub {
                "add" => {
                    let id = str_arg(args, "id").ok_or_else(|| RuntimeError::MissingParam("id".into()))?.to_string();
                    let pattern = str_arg(args, "pattern").ok_or_else(|| RuntimeError::MissingParam("pattern".into()))?.to_string();
                    state.noise.add(id, pattern).map_err(|e| RuntimeError::InvalidParam { param: "pattern".into(), reason: e.to_string() })?;
                    Ok(("noise rule added".into(), None))
                }
                "remove" => {
                    let id = str_arg(args, "id").ok_or_else(|| RuntimeError::MissingParam("id".into()))?;
                    let removed = state.noise.remove(id);
                    Ok(("noise rule removed".into(), Some(json!({"removed": removed}))))
                }
                "list" => Ok(("noise rules".into(), Some(json!(state.noise.list())))),
                other => Err(RuntimeError::Unknown { kind: "sub_action", name: other.to_string() }),
            }
        }
        "dismiss" => {
            let id = str_arg(args, "id").ok_or_else(|| RuntimeError::MissingParam("id".into()))?;
            state.pending.resolve(id, json!({"dismissed": true}))?;
            Ok(("pending query dismissed".into(), None))
        }
        "clear" => {
            let removed = state.capture.clear_all();
            state.logs.clear();
            Ok(("cleared captured state".into(), Some(json!({"entries_removed": removed}))))
        }
        "query_dom" => query_dom(state, args).await,
        "save_sequence" => {
            let name = str_arg(args, "name").ok_or_else(|| RuntimeError::MissingParam("name".into()))?.to_string();
            let description = str_arg(args, "description").map(String::from);
            let tags: Vec<String> = args.get("tags").and_then(Value::as_array).map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect()).unwrap_or_default();
            let steps = args.get("steps").and_then(Value::as_array).cloned().ok_or_else(|| RuntimeError::MissingParam("steps".into()))?;
            let saved_at = chrono::Utc::now().to_rfc3339();
            let saved = sequence::save_sequence(state.sessions.as_ref(), name, description, tags, steps, saved_at).await?;
            Ok(("sequence saved".into(), Some(serde_json::to_value(saved).unwrap())))
        }
        "list_sequences" => {
            let names = sequence::list_sequences(state.sessions.as_ref()).await?;
            Ok(("saved sequences".into(), Some(json!(names))))
        }
        "get_sequence" => {
            let name = str_arg(args, "name").ok_or_else(|| RuntimeError::MissingParam("name".into()))?;
            let saved = sequence::get_sequence(state.sessions.as_ref(), name).await?;
            Ok(("sequence".into(), Some(serde_json::to_value(saved).unwrap())))
        }
        "delete_sequence" => {
            let name = str_arg(args, "name").ok_or_else(|| RuntimeError::MissingParam("name".into()))?;
            sequence::delete_sequence(state.sessions.as_ref(), name).await?;
            Ok(("sequence deleted".into(), None))
        }
        "replay_sequence" => {
            let name = str_arg(args, "name").ok_or_else(|| RuntimeError::MissingParam("name".into()))?;
            let override_steps = args.get("override_steps").and_then(Value::as_array).map(|a| {
                a.iter()
                    .map(|v| if v.is_null() { None } else { Some(v.clone()) })
                    .collect()
            });
            let options = ReplayOptions {
                continue_on_error: args.get("continue_on_error").and_then(Value::as_bool),
                override_steps,
                stop_after_step: usize_arg(args, "stop_after_step"),
            };
            let executor = PendingQueryStepExecutor { pending: Arc::clone(&state.pending) };
            let result = state.replayer.replay(state.sessions.as_ref(), &executor, name, options).await?;
            Ok(("sequence replayed".into(), Some(serde_json::to_value(result).unwrap())))
        }
        other => Err(RuntimeError::Unknown { kind: "action", name: other.to_string() }),
    }
}

/// Drives a saved sequence's steps through the same pending-query rendezvous
/// the extension uses for `query_dom` — a step is just an opaque "interact"
/// request the extension acknowledges.
struct PendingQueryStepExecutor {
    pending: Arc<crate::capture::PendingQueryEngine>,
}

#[async_trait]
impl StepExecutor for PendingQueryStepExecutor {
    async fn execute_step(&self, step: &Value) -> Result<Value> {
        let timeout = Duration::from_secs(10);
        let query = self.pending.create("interact".into(), step.clone(), None, Some(timeout));
        self.pending.wait(query.id, timeout, None).await
    }
}

// ----------------------------------------------------------- leaf tools

async fn query_dom(state: &Arc<AppState>, args: &Value) -> ToolOutcome {
    let selector = str_arg(args, "selector").ok_or_else(|| RuntimeError::MissingParam("selector".into()))?;
    let timeout = args
        .get("timeout_ms")
        .and_then(Value::as_u64)
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(10));
    let query = state.pending.create("dom".into(), json!({"selector": selector}), str_arg(args, "tab_id").map(String::from), Some(timeout));
    let result = state.pending.wait(query.id, timeout, None).await?;
    Ok(("DOM query resolved".into(), Some(result)))
}

async fn generate_csp(state: &Arc<AppState>) -> ToolOutcome {
    let bodies = state.capture.get_network_bodies(&NetworkFilter { limit: Some(usize::MAX), ..Default::default() });
    let mut hosts: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
    for body in &bodies {
        if let Ok(url) = Url::parse(&body.url) {
            if let Some(host) = url.host_str() {
                hosts.insert(host.to_string());
            }
        }
    }
    let sources = hosts.iter().map(|h| format!("https://{h}")).collect::<Vec<_>>().join(" ");
    let policy = if sources.is_empty() {
        "default-src 'self'".to_string()
    } else {
        format!("default-src 'self'; connect-src 'self' {sources}")
    };
    Ok(("generated Content-Security-Policy".into(), Some(json!({"policy": policy, "observed_hosts": hosts}))))
}

#[derive(Debug, Clone, serde::Serialize)]
struct SecurityFinding {
    rule: &'static str,
    severity: &'static str,
    message: String,
    url: Option<String>,
}

fn security_findings(state: &AppState) -> Vec<SecurityFinding> {
    let bodies = state.capture.get_network_bodies(&NetworkFilter { limit: Some(usize::MAX), ..Default::default() });
    let mut findings = Vec::new();
    for body in &bodies {
        if body.url.starts_with("http://") {
            findings.push(SecurityFinding {
                rule: "insecure_request",
                severity: "warning",
                message: format!("{} {} was sent over plain HTTP", body.method, body.url),
                url: Some(body.url.clone()),
            });
        }
        for (label, value) in [("request_body", &body.request_body), ("response_body", &body.response_body)] {
            if contains_sensitive_key(value) {
                findings.push(SecurityFinding {
                    rule: "potential_credential_exposure",
                    severity: "error",
                    message: format!("{label} for {} contains an unredacted credential-shaped field", body.url),
                    url: Some(body.url.clone()),
                });
            }
        }
    }
    findings
}

fn contains_sensitive_key(value: &Option<Value>) -> bool {
    const SENSITIVE: &[&str] = &["password", "secret", "token", "api_key", "apikey"];
    match value {
        Some(Value::Object(map)) => map.iter().any(|(k, v)| {
            SENSITIVE.iter().any(|s| k.to_lowercase().contains(s)) && v.as_str().map(|s| s != crate::types::REDACTED_PLACEHOLDER).unwrap_or(true)
        }),
        _ => false,
    }
}

async fn security_audit(state: &Arc<AppState>) -> ToolOutcome {
    let findings = security_findings(state);
    Ok(("security audit complete".into(), Some(json!({"findings": findings, "count": findings.len()}))))
}

async fn get_audit_log(state: &Arc<AppState>) -> ToolOutcome {
    let timeline = collect_timeline(state);
    Ok(("audit log".into(), Some(json!(timeline))))
}

async fn diff_sessions(state: &Arc<AppState>, args: &Value) -> ToolOutcome {
    let result = state.diff.diff(&state.capture, &state.logs, &DiffInclude::all(), SeverityFilter::All, str_arg(args, "checkpoint"))?;
    Ok(("diffed sessions".into(), Some(serde_json::to_value(result).unwrap())))
}

fn sarif_document(findings: &[SecurityFinding]) -> Value {
    let results: Vec<Value> = findings
        .iter()
        .map(|f| {
            json!({
                "ruleId": f.rule,
                "level": if f.severity == "error" { "error" } else { "warning" },
                "message": {"text": f.message},
                "locations": f.url.as_ref().map(|u| vec![json!({"physicalLocation": {"artifactLocation": {"uri": u}}})]).unwrap_or_default(),
            })
        })
        .collect();
    json!({
        "version": "2.1.0",
        "$schema": "https://raw.githubusercontent.com/oasis-tcs/sarif-spec/master/Schemata/sarif-schema-2.1.0.json",
        "runs": [{
            "tool": {"driver": {"name": "devconsoled", "version": env!("CARGO_PKG_VERSION")}},
            "results": results,
        }],
    })
}
