//! 4.E Diff engine: checkpoint-based differencing reporting new errors,
//! new/regressed/degraded endpoints, WebSocket disconnections, and new
//! actions since a checkpoint.

use crate::capture::{CaptureStore, LogBuffer};
use crate::errors::{Result, RuntimeError};
use crate::schema_store::parameterize_path;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeverityFilter {
    ErrorsOnly,
    Warnings,
    All,
}

impl Default for SeverityFilter {
    fn default() -> Self {
        SeverityFilter::All
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Clean,
    Warning,
    Error,
}

#[derive(Debug, Clone, Default)]
pub struct DiffInclude {
    pub console: bool,
    pub network: bool,
    pub websocket: bool,
    pub actions: bool,
}

impl DiffInclude {
    pub fn all() -> Self {
        Self {
            console: true,
            network: true,
            websocket: true,
            actions: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DedupedEntry {
    pub message: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsoleDiff {
    pub new_errors: Vec<DedupedEntry>,
    pub new_warnings: Vec<DedupedEntry>,
    pub new_info_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewEndpoint {
    pub method: String,
    pub path_pattern: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    pub method: String,
    pub path_pattern: String,
    pub status: u16,
    pub previous_status: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct Degraded {
    pub method: String,
    pub path_pattern: String,
    pub duration_ms: f64,
    pub baseline_ms: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NetworkDiff {
    pub new_endpoints: Vec<NewEndpoint>,
    pub failures: Vec<Failure>,
    pub degraded: Vec<Degraded>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WebSocketDiff {
    pub new_connections: u64,
    pub disconnections: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ActionsDiff {
    pub new_count: u64,
    pub samples: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiffResult {
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub console: Option<ConsoleDiff>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkDiff>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub websocket: Option<WebSocketDiff>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actions: Option<ActionsDiff>,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Clean
    }
}

pub struct DiffEngine {
    auto_checkpoint: RwLock<DateTime<Utc>>,
    named: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl DiffEngine {
    pub fn new() -> Self {
        Self {
            auto_checkpoint: RwLock::new(Utc::now()),
            named: RwLock::new(HashMap::new()),
        }
    }

    /// Stamp the current instant under `name` for later reference as
    /// `checkpoint=name`.
    pub fn save_named_checkpoint(&self, name: String) {
        self.named.write().insert(name, Utc::now());
    }

    fn resolve(&self, checkpoint_arg: Option<&str>) -> Result<(DateTime<Utc>, bool)> {
        match checkpoint_arg {
            None => Ok((*self.auto_checkpoint.read(), true)),
            Some(label) => {
                if let Some(ts) = self.named.read().get(label) {
                    return Ok((*ts, false));
                }
                if let Ok(ts) = DateTime::parse_from_rfc3339(label) {
                    return Ok((ts.with_timezone(&Utc), false));
                }
                Err(RuntimeError::InvalidParam {
                    param: "checkpoint".into(),
                    reason: format!("`{label}` is neither a known named checkpoint nor an RFC3339 timestamp"),
                })
            }
        }
    }

    pub fn diff(
        &self,
        capture: &CaptureStore,
        logs: &LogBuffer,
        include: &DiffInclude,
        severity_filter: SeverityFilter,
        checkpoint_arg: Option<&str>,
    ) -> Result<DiffResult> {
        let (since, is_auto) = self.resolve(checkpoint_arg)?;
        let mut result = DiffResult::default();

        if include.console {
            result.console = Some(console_diff(logs, since));
        }
        if include.network {
            result.network = Some(network_diff(capture, since));
        }
        if include.websocket {
            result.websocket = Some(websocket_diff(capture, since));
        }
        if include.actions {
            result.actions = Some(actions_diff(capture, since));
        }

        result.severity = compute_severity(&result);
        apply_severity_filter(&mut result, severity_filter);

        if is_auto {
            *self.auto_checkpoint.write() = Utc::now();
        }
        Ok(result)
    }
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_message(message: &str) -> String {
    message.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn console_diff(logs: &LogBuffer, since: DateTime<Utc>) -> ConsoleDiff {
    let mut new_errors: HashMap<String, u64> = HashMap::new();
    let mut new_warnings: HashMap<String, u64> = HashMap::new();
    let mut info_count = 0u64;

    for (ts, entry) in logs.entries_with_time() {
        if ts <= since {
            continue;
        }
        let Some(level) = entry.level() else { continue };
        let message = normalize_message(entry.message().unwrap_or_default());
        match level {
            "error" => *new_errors.entry(message).or_insert(0) += 1,
            "warn" => *new_warnings.entry(message).or_insert(0) += 1,
            "info" => info_count += 1,
            _ => {}
        }
    }

    let to_sorted_vec = |map: HashMap<String, u64>| {
        let mut v: Vec<DedupedEntry> = map
            .into_iter()
            .map(|(message, count)| DedupedEntry { message, count })
            .collect();
        v.sort_by(|a, b| b.count.cmp(&a.count).then(a.message.cmp(&b.message)));
        v
    };

    ConsoleDiff {
        new_errors: to_sorted_vec(new_errors),
        new_warnings: to_sorted_vec(new_warnings),
        new_info_count: info_count,
    }
}

fn path_of(url: &str) -> String {
    Url::parse(url).map(|u| u.path().to_string()).unwrap_or_else(|_| url.to_string())
}

fn network_diff(capture: &CaptureStore, since: DateTime<Utc>) -> NetworkDiff {
    let all = capture.network_bodies_with_time();

    let mut seen_before: HashSet<(String, String)> = HashSet::new();
    let mut last_status_before: HashMap<(String, String), u16> = HashMap::new();
    let mut durations_before: HashMap<(String, String), Vec<f64>> = HashMap::new();

    for (ts, body) in &all {
        if *ts > since {
            continue;
        }
        let key = (body.method.to_uppercase(), parameterize_path(&path_of(&body.url)));
        seen_before.insert(key.clone());
        if let Some(status) = body.status {
            last_status_before.insert(key.clone(), status);
        }
        if let Some(d) = body.duration_ms {
            durations_before.entry(key).or_default().push(d);
        }
    }

    let mut new_endpoints = Vec::new();
    let mut seen_new: HashSet<(String, String)> = HashSet::new();
    let mut failures = Vec::new();
    let mut degraded = Vec::new();

    for (ts, body) in &all {
        if *ts <= since {
            continue;
        }
        let key = (body.method.to_uppercase(), parameterize_path(&path_of(&body.url)));
        if !seen_before.contains(&key) && seen_new.insert(key.clone()) {
            new_endpoints.push(NewEndpoint {
                method: key.0.clone(),
                path_pattern: key.1.clone(),
            });
        }
        if let Some(status) = body.status {
            if let Some(&prev) = last_status_before.get(&key) {
                if prev <= 399 && status >= 400 {
                    failures.push(Failure {
                        method: key.0.clone(),
                        path_pattern: key.1.clone(),
                        status,
                        previous_status: prev,
                    });
                }
            }
        }
        if let (Some(duration), Some(samples)) = (body.duration_ms, durations_before.get(&key)) {
            if !samples.is_empty() {
                let baseline = samples.iter().sum::<f64>() / samples.len() as f64;
                if baseline > 0.0 && duration >= baseline * 3.0 {
                    degraded.push(Degraded {
                        method: key.0.clone(),
                        path_pattern: key.1.clone(),
                        duration_ms: duration,
                        baseline_ms: baseline,
                    });
                }
            }
        }
    }

    NetworkDiff {
        new_endpoints,
        failures,
        degraded,
    }
}

fn websocket_diff(capture: &CaptureStore, since: DateTime<Utc>) -> WebSocketDiff {
    use crate::types::WsEventKind;
    let mut diff = WebSocketDiff::default();
    for (ts, event) in capture.ws_events_with_time() {
        if ts <= since {
            continue;
        }
        match event.event {
            WsEventKind::Open => diff.new_connections += 1,
            WsEventKind::Close if event.is_abnormal_close() => diff.disconnections += 1,
            WsEventKind::Error => diff.errors += 1,
            _ => {}
        }
    }
    diff
}

fn actions_diff(capture: &CaptureStore, since: DateTime<Utc>) -> ActionsDiff {
    let new: Vec<_> = capture
        .actions_with_time()
        .into_iter()
        .filter(|(ts, _)| *ts > since)
        .map(|(_, a)| serde_json::to_value(a).unwrap_or_default())
        .collect();
    ActionsDiff {
        new_count: new.len() as u64,
        samples: new.into_iter().take(5).collect(),
    }
}

fn compute_severity(result: &DiffResult) -> Severity {
    let has_error = result
        .console
        .as_ref()
        .map(|c| !c.new_errors.is_empty())
        .unwrap_or(false)
        || result.network.as_ref().map(|n| !n.failures.is_empty()).unwrap_or(false)
        || result.websocket.as_ref().map(|w| w.errors > 0 || w.disconnections > 0).unwrap_or(false);
    if has_error {
        return Severity::Error;
    }
    let has_warning = result
        .console
        .as_ref()
        .map(|c| !c.new_warnings.is_empty())
        .unwrap_or(false)
        || result
            .network
            .as_ref()
            .map(|n| !n.new_endpoints.is_empty() || !n.degraded.is_empty())
            .unwrap_or(false)
        || result.websocket.as_ref().map(|w| w.new_connections > 0).unwrap_or(false)
        || result.actions.as_ref().map(|a| a.new_count > 0).unwrap_or(false);
    if has_warning {
        Severity::Warning
    } else {
        Severity::Clean
    }
}

fn apply_severity_filter(result: &mut DiffResult, filter: SeverityFilter) {
    match filter {
        SeverityFilter::All => {}
        SeverityFilter::Warnings => {
            if let Some(console) = &mut result.console {
                console.new_info_count = 0;
            }
        }
        SeverityFilter::ErrorsOnly => {
            if let Some(console) = &mut result.console {
                console.new_warnings.clear();
                console.new_info_count = 0;
            }
            if let Some(network) = &mut result.network {
                network.new_endpoints.clear();
                network.degraded.clear();
            }
            if let Some(ws) = &mut result.websocket {
                ws.new_connections = 0;
            }
            result.actions = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NetworkBody;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn capture() -> std::sync::Arc<CaptureStore> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        CaptureStore::new(crate::config::CaptureConfig::default(), false, tx)
    }

    fn logs() -> std::sync::Arc<LogBuffer> {
        let dir = tempfile::tempdir().unwrap();
        LogBuffer::new(1000, dir.path().join("log.ndjson"))
    }

    fn log_entry(level: &str, message: &str) -> crate::types::LogEntry {
        let serde_json::Value::Object(fields) = json!({"level": level, "message": message}) else {
            unreachable!()
        };
        crate::types::LogEntry { fields }
    }

    #[tokio::test]
    async fn duplicate_errors_are_deduplicated_with_count() {
        let capture = capture();
        let logs = logs();
        let engine = DiffEngine::new();
        logs.add_entries(vec![
            log_entry("error", "TypeError X"),
            log_entry("error", "TypeError X"),
            log_entry("error", "TypeError X"),
        ]);
        let result = engine
            .diff(&capture, &logs, &DiffInclude::all(), SeverityFilter::All, None)
            .unwrap();
        let console = result.console.unwrap();
        assert_eq!(console.new_errors.len(), 1);
        assert_eq!(console.new_errors[0].count, 3);
        assert_eq!(result.severity, Severity::Error);
    }

    #[tokio::test]
    async fn second_auto_checkpoint_call_with_no_new_ingest_is_clean() {
        let capture = capture();
        let logs = logs();
        let engine = DiffEngine::new();
        logs.add_entries(vec![log_entry("error", "boom")]);
        let first = engine
            .diff(&capture, &logs, &DiffInclude::all(), SeverityFilter::All, None)
            .unwrap();
        assert_eq!(first.severity, Severity::Error);
        let second = engine
            .diff(&capture, &logs, &DiffInclude::all(), SeverityFilter::All, None)
            .unwrap();
        assert_eq!(second.severity, Severity::Clean);
        assert!(second.console.unwrap().new_errors.is_empty());
    }

    #[tokio::test]
    async fn named_checkpoint_does_not_advance_auto_checkpoint() {
        let capture = capture();
        let logs = logs();
        let engine = DiffEngine::new();
        engine.save_named_checkpoint("before".into());
        logs.add_entries(vec![log_entry("error", "e1")]);
        let named_result = engine
            .diff(&capture, &logs, &DiffInclude::all(), SeverityFilter::All, Some("before"))
            .unwrap();
        assert_eq!(named_result.console.unwrap().new_errors.len(), 1);
        // auto-checkpoint was never advanced by the named call, so a
        // subsequent auto call still sees the same new entry.
        let auto_result = engine
            .diff(&capture, &logs, &DiffInclude::all(), SeverityFilter::All, None)
            .unwrap();
        assert_eq!(auto_result.console.unwrap().new_errors.len(), 1);
    }

    #[tokio::test]
    async fn failure_reports_status_and_previous_status() {
        let capture = capture();
        let logs = logs();
        let engine = DiffEngine::new();
        capture.add_network_bodies(vec![NetworkBody {
            method: "GET".into(),
            url: "https://x/api/users".into(),
            status: Some(200),
            ..Default::default()
        }]);
        // advance auto checkpoint past the healthy observation.
        engine
            .diff(&capture, &logs, &DiffInclude::all(), SeverityFilter::All, None)
            .unwrap();
        capture.add_network_bodies(vec![NetworkBody {
            method: "GET".into(),
            url: "https://x/api/users".into(),
            status: Some(500),
            ..Default::default()
        }]);
        let result = engine
            .diff(&capture, &logs, &DiffInclude::all(), SeverityFilter::All, None)
            .unwrap();
        let network = result.network.unwrap();
        assert_eq!(network.failures.len(), 1);
        assert_eq!(network.failures[0].status, 500);
        assert_eq!(network.failures[0].previous_status, 200);
    }
}
