//! 4.F Timeline and generators: chronological merge of captured streams,
//! reproduction/test script synthesis, and HAR export. All pure functions
//! over borrowed snapshots — no lock of its own.

use crate::errors::{Result, RuntimeError};
use crate::types::{ActionType, EnhancedAction, LogEntry, NetworkBody};
use chrono::DateTime;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Component, Path};

const TIMELINE_CAP: usize = 200;
const REPRODUCTION_SCRIPT_CAP_BYTES: usize = 50 * 1024;
const RESPONSE_SHAPE_MAX_DEPTH: usize = 4;
const HAR_CREATOR_NAME: &str = "devconsoled";
const HAR_CREATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimelineKind {
    Action,
    Network,
    Console,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    pub ts_ms: i64,
    pub kind: TimelineKind,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_shape: Option<Value>,
}

fn parse_rfc3339_ms(ts: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(ts).ok().map(|t| t.timestamp_millis())
}

/// Keys-only shape of a JSON value: values are replaced by their type name,
/// recursing into objects up to `max_depth`.
pub fn response_shape(value: &Value, max_depth: usize) -> Value {
    match value {
        Value::Object(map) if max_depth > 0 => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), response_shape(v, max_depth - 1)))
                .collect(),
        ),
        other => Value::String(type_name(other).to_string()),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Merge actions, network bodies, and `error|warn` console entries into a
/// single timestamp-ordered list, capped at 200. Entries without a valid
/// timestamp are skipped — they cannot be placed chronologically.
pub fn build_timeline(
    actions: &[EnhancedAction],
    network_bodies: &[NetworkBody],
    console_entries: &[LogEntry],
) -> Vec<TimelineEntry> {
    let mut entries = Vec::new();

    for action in actions {
        entries.push(TimelineEntry {
            ts_ms: action.ts_ms,
            kind: TimelineKind::Action,
            payload: serde_json::to_value(action).unwrap_or(Value::Null),
            response_shape: None,
        });
    }

    for body in network_bodies {
        let Some(ts_ms) = body.ts.as_deref().and_then(parse_rfc3339_ms) else {
            continue;
        };
        let shape = body
            .response_body
            .as_ref()
            .filter(|v| v.is_object())
            .map(|v| response_shape(v, RESPONSE_SHAPE_MAX_DEPTH));
        entries.push(TimelineEntry {
            ts_ms,
            kind: TimelineKind::Network,
            payload: serde_json::to_value(body).unwrap_or(Value::Null),
            response_shape: shape,
        });
    }

    for entry in console_entries {
        let level = entry.level().unwrap_or("");
        if level != "error" && level != "warn" {
            continue;
        }
        let Some(ts_ms) = entry.ts().and_then(parse_rfc3339_ms) else {
            continue;
        };
        entries.push(TimelineEntry {
            ts_ms,
            kind: TimelineKind::Console,
            payload: serde_json::to_value(entry).unwrap_or(Value::Null),
            response_shape: None,
        });
    }

    entries.sort_by_key(|e| e.ts_ms);
    entries.truncate(TIMELINE_CAP);
    entries
}

// -- reproduction script --------------------------------------------------

const SELECTOR_PRIORITY: &[&str] = &["testId", "role", "ariaLabel", "text", "id", "cssPath"];

fn pick_selector(action: &EnhancedAction) -> Option<(&str, &str)> {
    for key in SELECTOR_PRIORITY {
        if let Some(value) = action.selectors.get(*key) {
            return Some((key, value.as_str()));
        }
    }
    None
}

fn rewrite_origin(url: &str, base_url: Option<&str>) -> String {
    let Some(base_url) = base_url else { return url.to_string() };
    match (url::Url::parse(url), url::Url::parse(base_url)) {
        (Ok(mut parsed), Ok(base)) => {
            let _ = parsed.set_scheme(base.scheme());
            let _ = parsed.set_host(base.host_str());
            let _ = parsed.set_port(base.port());
            parsed.to_string()
        }
        _ => url.to_string(),
    }
}

fn playwright_step(action: &EnhancedAction, base_url: Option<&str>) -> String {
    match action.action_type {
        ActionType::Navigate => {
            let url = action.to_url.as_deref().unwrap_or("/");
            format!("  await page.goto('{}');", rewrite_origin(url, base_url))
        }
        ActionType::Click => match pick_selector(action) {
            Some(("role", value)) => format!("  await page.getByRole('{value}').click();"),
            Some(("text", value)) => format!("  await page.getByText('{value}').click();"),
            Some((_, value)) => format!("  await page.click('{value}');"),
            None => "  // click: no selector captured".to_string(),
        },
        ActionType::Input => {
            let value = action.value.as_deref().unwrap_or("");
            match pick_selector(action) {
                Some((_, selector)) => format!("  await page.fill('{selector}', '{value}');"),
                None => "  // input: no selector captured".to_string(),
            }
        }
        ActionType::Keypress => {
            let key = action.key.as_deref().unwrap_or("Enter");
            format!("  await page.keyboard.press('{key}');")
        }
        ActionType::Select => {
            let value = action.selected_value.as_deref().unwrap_or("");
            match pick_selector(action) {
                Some((_, selector)) => format!("  await page.selectOption('{selector}', '{value}');"),
                None => "  // select: no selector captured".to_string(),
            }
        }
        ActionType::Scroll => {
            let y = action.scroll_y.unwrap_or(0.0);
            format!("  await page.mouse.wheel(0, {y});")
        }
    }
}

/// Emit a syntactically valid Playwright end-to-end test from a window of
/// actions. Gaps > 2s between consecutive actions are annotated; output is
/// capped at 50 KiB.
pub fn generate_reproduction_script(actions: &[EnhancedAction], base_url: Option<&str>) -> String {
    let mut out = String::new();
    out.push_str("import { test, expect } from '@playwright/test';\n\n");
    out.push_str("test('reproduction', async ({ page }) => {\n");

    let mut prev_ts: Option<i64> = None;
    for action in actions {
        if let Some(prev) = prev_ts {
            let gap_ms = action.ts_ms - prev;
            if gap_ms > 2000 {
                out.push_str(&format!("  // gap of {:.1}s\n", gap_ms as f64 / 1000.0));
            }
        }
        prev_ts = Some(action.ts_ms);
        out.push_str(&playwright_step(action, base_url));
        out.push('\n');
    }

    out.push_str("});\n");

    if out.len() > REPRODUCTION_SCRIPT_CAP_BYTES {
        out.truncate(REPRODUCTION_SCRIPT_CAP_BYTES);
        out.push_str("\n// ... truncated at 50 KiB\n");
    }
    out
}

// -- test script -----------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct TestScriptOptions {
    pub assert_network: bool,
    pub assert_no_errors: bool,
    pub assert_response_shape: bool,
}

/// Emit a test script from a timeline, with toggleable assertions. When
/// `assert_no_errors` is requested but errors were observed, the assertion
/// is emitted commented-out with an explanatory note.
pub fn generate_test_script(timeline: &[TimelineEntry], options: &TestScriptOptions) -> String {
    let has_errors = timeline.iter().any(|e| {
        e.kind == TimelineKind::Console
            && e.payload.get("level").and_then(Value::as_str) == Some("error")
    });

    let mut out = String::new();
    out.push_str("import { test, expect } from '@playwright/test';\n\n");
    out.push_str("test('captured session', async ({ page }) => {\n");

    for entry in timeline {
        match entry.kind {
            TimelineKind::Network if options.assert_network => {
                if let Some(url) = entry.payload.get("url").and_then(Value::as_str) {
                    out.push_str(&format!(
                        "  // expect network call to {url}\n  // assertNetwork('{url}');\n"
                    ));
                }
                if options.assert_response_shape {
                    if let Some(shape) = &entry.response_shape {
                        out.push_str(&format!(
                            "  // expected response shape: {}\n",
                            serde_json::to_string(shape).unwrap_or_default()
                        ));
                    }
                }
            }
            _ => {}
        }
    }

    if options.assert_no_errors {
        if has_errors {
            out.push_str(
                "  // assertNoErrors requested, but errors were observed in the source session:\n",
            );
            out.push_str("  // await expect(page).toHaveNoConsoleErrors();\n");
        } else {
            out.push_str("  await expect(page).toHaveNoConsoleErrors();\n");
        }
    }

    out.push_str("});\n");
    out
}

// -- HAR export -------------------------------------------------------------

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "",
    }
}

fn validate_save_path(path: &Path) -> Result<()> {
    if path.is_absolute() {
        let tmp = std::env::temp_dir();
        if !path.starts_with(&tmp) {
            return Err(RuntimeError::InvalidParam {
                param: "save_to".into(),
                reason: "absolute paths must be under the OS temp directory".into(),
            });
        }
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(RuntimeError::InvalidParam {
            param: "save_to".into(),
            reason: "path traversal (`..`) is not allowed".into(),
        });
    }
    Ok(())
}

/// Build a HAR 1.2 document from network bodies in chronological order.
/// Entries without a parseable `ts` sort last, stably.
pub fn generate_har(bodies: &[NetworkBody], save_to: Option<&Path>) -> Result<String> {
    if let Some(path) = save_to {
        validate_save_path(path)?;
    }

    let mut ordered: Vec<&NetworkBody> = bodies.iter().collect();
    ordered.sort_by_key(|b| b.ts.as_deref().and_then(parse_rfc3339_ms).unwrap_or(i64::MAX));

    let entries: Vec<Value> = ordered
        .iter()
        .map(|body| {
            let started = body.ts.clone().unwrap_or_default();
            let duration = body.duration_ms.unwrap_or(-1.0);
            let request = json!({
                "method": body.method,
                "url": body.url,
                "httpVersion": "HTTP/1.1",
                "headers": [],
                "queryString": [],
                "cookies": [],
                "headersSize": -1,
                "bodySize": body_size(&body.request_body),
            });
            let status = body.status.unwrap_or(0);
            let response = json!({
                "status": status,
                "statusText": status_text(status),
                "httpVersion": "HTTP/1.1",
                "headers": [],
                "cookies": [],
                "redirectURL": "",
                "headersSize": -1,
                "bodySize": body_size(&body.response_body),
                "content": {
                    "size": body_size(&body.response_body),
                    "mimeType": body.content_type.clone().unwrap_or_default(),
                },
            });
            let mut entry = json!({
                "startedDateTime": started,
                "time": duration.max(0.0),
                "request": request,
                "response": response,
                "cache": {},
                "timings": {
                    "send": -1,
                    "wait": duration,
                    "receive": -1,
                },
            });
            if body.request_truncated || body.response_truncated {
                entry["comment"] = json!(truncation_comment(body));
            }
            entry
        })
        .collect();

    let har = json!({
        "log": {
            "version": "1.2",
            "creator": { "name": HAR_CREATOR_NAME, "version": HAR_CREATOR_VERSION },
            "entries": entries,
        }
    });

    let text = serde_json::to_string_pretty(&har).map_err(|e| RuntimeError::InvalidJson(e.to_string()))?;

    if let Some(path) = save_to {
        std::fs::write(path, &text).map_err(|e| RuntimeError::Io(e.to_string()))?;
    }

    Ok(text)
}

fn body_size(body: &Option<Value>) -> i64 {
    body.as_ref()
        .map(|v| serde_json::to_string(v).map(|s| s.len() as i64).unwrap_or(-1))
        .unwrap_or(-1)
}

fn truncation_comment(body: &NetworkBody) -> String {
    match (body.request_truncated, body.response_truncated) {
        (true, true) => "request and response bodies truncated".to_string(),
        (true, false) => "request body truncated".to_string(),
        (false, true) => "response body truncated".to_string(),
        (false, false) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn action(ts_ms: i64, action_type: ActionType) -> EnhancedAction {
        EnhancedAction {
            action_type,
            ts_ms,
            url: None,
            selectors: HashMap::new(),
            value: None,
            input_type: None,
            key: None,
            from_url: None,
            to_url: None,
            selected_value: None,
            scroll_y: None,
        }
    }

    fn network_body(ts: &str, status: u16) -> NetworkBody {
        NetworkBody {
            ts: Some(ts.to_string()),
            method: "GET".into(),
            url: "https://x/api/users".into(),
            status: Some(status),
            ..Default::default()
        }
    }

    #[test]
    fn timeline_is_chronologically_sorted_and_capped() {
        let actions = vec![action(3000, ActionType::Click), action(1000, ActionType::Click)];
        let timeline = build_timeline(&actions, &[], &[]);
        assert_eq!(timeline[0].ts_ms, 1000);
        assert_eq!(timeline[1].ts_ms, 3000);
    }

    #[test]
    fn timeline_skips_network_bodies_without_timestamp() {
        let mut body = network_body("2024-01-01T00:00:00Z", 200);
        body.ts = None;
        let timeline = build_timeline(&[], &[body], &[]);
        assert!(timeline.is_empty());
    }

    #[test]
    fn response_shape_replaces_values_with_type_names() {
        let value = json!({"id": 1, "nested": {"name": "a"}});
        let shape = response_shape(&value, RESPONSE_SHAPE_MAX_DEPTH);
        assert_eq!(shape["id"], json!("integer"));
        assert_eq!(shape["nested"]["name"], json!("string"));
    }

    #[test]
    fn gap_over_two_seconds_is_annotated() {
        let actions = vec![action(0, ActionType::Click), action(3500, ActionType::Click)];
        let script = generate_reproduction_script(&actions, None);
        assert!(script.contains("gap of"));
    }

    #[test]
    fn password_value_never_appears_raw_because_upstream_redacts() {
        let mut a = action(0, ActionType::Input);
        a.input_type = Some("password".into());
        a.value = Some("hunter2".into());
        a.redact_password();
        a.selectors.insert("id".into(), "pw".into());
        let script = generate_reproduction_script(&[a], None);
        assert!(!script.contains("hunter2"));
        assert!(script.contains("[redacted]"));
    }

    #[test]
    fn har_entries_are_chronologically_ordered_and_count_matches() {
        let bodies = vec![network_body("2024-01-01T00:00:02Z", 200), network_body("2024-01-01T00:00:01Z", 500)];
        let har = generate_har(&bodies, None).unwrap();
        let parsed: Value = serde_json::from_str(&har).unwrap();
        let entries = parsed["log"]["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["startedDateTime"], json!("2024-01-01T00:00:01Z"));
        assert_eq!(entries[1]["startedDateTime"], json!("2024-01-01T00:00:02Z"));
    }

    #[test]
    fn har_headers_and_query_string_are_always_arrays() {
        let har = generate_har(&[network_body("2024-01-01T00:00:00Z", 200)], None).unwrap();
        let parsed: Value = serde_json::from_str(&har).unwrap();
        let entry = &parsed["log"]["entries"][0];
        assert!(entry["request"]["headers"].is_array());
        assert!(entry["request"]["queryString"].is_array());
    }

    #[test]
    fn har_save_to_rejects_path_traversal() {
        let err = generate_har(&[], Some(Path::new("../escape.har"))).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::InvalidParam);
    }

    #[test]
    fn unknown_status_code_yields_empty_status_text() {
        assert_eq!(status_text(999), "");
        assert_eq!(status_text(200), "OK");
    }
}
