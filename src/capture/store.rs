//! 4.B Capture store: the process-wide singleton holding the network-body,
//! WebSocket-event, action, and performance-snapshot ring buffers behind a
//! single reader/writer lock, plus the connection tracker.

use super::connection_tracker::ConnectionTracker;
use crate::config::CaptureConfig;
use crate::noise::redact_action;
use crate::types::{
    ConnectionState, EnhancedAction, NetworkBody, PerformanceBaseline, PerformanceSnapshot,
    WebSocketEvent, WsDirection,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Default, Clone)]
pub struct NetworkFilter {
    pub url_contains: Option<String>,
    pub method: Option<String>,
    pub status_min: Option<u16>,
    pub status_max: Option<u16>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Clone)]
pub struct WsFilter {
    pub connection_id: Option<String>,
    pub direction: Option<WsDirection>,
    pub limit: Option<usize>,
}

const DEFAULT_NETWORK_LIMIT: usize = 20;
const DEFAULT_WS_LIMIT: usize = 50;

struct Buffers {
    network_bodies: Vec<NetworkBody>,
    network_added_at: Vec<DateTime<Utc>>,
    ws_events: Vec<WebSocketEvent>,
    ws_added_at: Vec<DateTime<Utc>>,
    actions: Vec<EnhancedAction>,
    actions_added_at: Vec<DateTime<Utc>>,
    performance: HashMap<String, PerformanceSnapshot>,
    baselines: HashMap<String, PerformanceBaseline>,
    conns: ConnectionTracker,
}

pub struct CaptureStore {
    inner: RwLock<Buffers>,
    config: CaptureConfig,
    minimal_mode: bool,
    schema_fanout_tx: UnboundedSender<NetworkBody>,
}

#[derive(Debug, serde::Serialize)]
pub struct HealthSnapshot {
    pub network_bodies: usize,
    pub ws_events: usize,
    pub actions: usize,
    pub active_connections: usize,
    pub closed_connections: usize,
    pub minimal_mode: bool,
}

impl CaptureStore {
    pub fn new(config: CaptureConfig, minimal_mode: bool, schema_fanout_tx: UnboundedSender<NetworkBody>) -> Arc<Self> {
        let effective = config.effective(minimal_mode);
        let conns = ConnectionTracker::new(
            effective.max_active_connections,
            effective.max_closed_connections,
            effective.connection_window_secs,
        );
        Arc::new(Self {
            inner: RwLock::new(Buffers {
                network_bodies: Vec::new(),
                network_added_at: Vec::new(),
                ws_events: Vec::new(),
                ws_added_at: Vec::new(),
                actions: Vec::new(),
                actions_added_at: Vec::new(),
                performance: HashMap::new(),
                baselines: HashMap::new(),
                conns,
            }),
            config: effective,
            minimal_mode,
            schema_fanout_tx,
        })
    }

    // -- network bodies ----------------------------------------------------

    pub fn add_network_bodies(&self, mut bodies: Vec<NetworkBody>) {
        for body in &mut bodies {
            truncate_body(body, &self.config);
        }
        let mut inner = self.inner.write();
        for body in bodies {
            let _ = self.schema_fanout_tx.send(body.clone());
            inner.network_bodies.push(body);
            inner.network_added_at.push(Utc::now());
        }
        evict_by_ttl(
            &mut inner.network_bodies,
            &mut inner.network_added_at,
            self.config.ttl_secs,
        );
        evict_by_count(
            &mut inner.network_bodies,
            &mut inner.network_added_at,
            self.config.max_network_bodies,
        );
        evict_by_memory(
            &mut inner.network_bodies,
            &mut inner.network_added_at,
            self.config.per_buffer_memory_limit_bytes,
            NetworkBody::approx_size,
        );
    }

    pub fn get_network_bodies(&self, filter: &NetworkFilter) -> Vec<NetworkBody> {
        let inner = self.inner.read();
        let mut result: Vec<NetworkBody> = inner
            .network_bodies
            .iter()
            .filter(|b| {
                filter
                    .url_contains
                    .as_ref()
                    .map(|needle| b.url.contains(needle.as_str()))
                    .unwrap_or(true)
            })
            .filter(|b| {
                filter
                    .method
                    .as_ref()
                    .map(|m| b.method.eq_ignore_ascii_case(m))
                    .unwrap_or(true)
            })
            .filter(|b| match (filter.status_min, filter.status_max, b.status) {
                (None, None, _) => true,
                (min, max, Some(status)) => {
                    min.map(|m| status >= m).unwrap_or(true) && max.map(|m| status <= m).unwrap_or(true)
                }
                (Some(_) | None, Some(_) | None, None) => false,
            })
            .cloned()
            .collect();
        result.reverse();
        result.truncate(filter.limit.unwrap_or(DEFAULT_NETWORK_LIMIT));
        result
    }

    // -- websocket events ----------------------------------------------------

    pub fn add_ws_events(&self, events: Vec<WebSocketEvent>) {
        let mut inner = self.inner.write();
        for event in events {
            inner.conns.observe(&event);
            inner.ws_events.push(event);
            inner.ws_added_at.push(Utc::now());
        }
        evict_by_count(
            &mut inner.ws_events,
            &mut inner.ws_added_at,
            self.config.max_ws_events,
        );
        evict_by_memory(
            &mut inner.ws_events,
            &mut inner.ws_added_at,
            self.config.per_buffer_memory_limit_bytes,
            WebSocketEvent::approx_size,
        );
    }

    pub fn get_ws_events(&self, filter: &WsFilter) -> Vec<WebSocketEvent> {
        let inner = self.inner.read();
        let mut result: Vec<WebSocketEvent> = inner
            .ws_events
            .iter()
            .filter(|e| {
                filter
                    .connection_id
                    .as_ref()
                    .map(|id| &e.id == id)
                    .unwrap_or(true)
            })
            .filter(|e| {
                filter
                    .direction
                    .map(|d| e.direction == Some(d))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        result.reverse();
        result.truncate(filter.limit.unwrap_or(DEFAULT_WS_LIMIT));
        result
    }

    pub fn active_connections(&self) -> Vec<ConnectionState> {
        let inner = self.inner.read();
        inner.conns.active.values().cloned().collect()
    }

    pub fn closed_connections(&self) -> Vec<ConnectionState> {
        self.inner.read().conns.closed.iter().cloned().collect()
    }

    // -- actions ----------------------------------------------------

    pub fn add_actions(&self, mut actions: Vec<EnhancedAction>) {
        for action in &mut actions {
            redact_action(action);
        }
        let mut inner = self.inner.write();
        for action in actions {
            inner.actions.push(action);
            inner.actions_added_at.push(Utc::now());
        }
        evict_by_count(
            &mut inner.actions,
            &mut inner.actions_added_at,
            self.config.max_actions,
        );
    }

    pub fn get_actions(&self, limit: Option<usize>) -> Vec<EnhancedAction> {
        let inner = self.inner.read();
        let mut result: Vec<EnhancedAction> = inner.actions.clone();
        result.reverse();
        if let Some(limit) = limit {
            result.truncate(limit);
        }
        result
    }

    // -- performance ----------------------------------------------------

    pub fn record_performance(&self, snapshot: PerformanceSnapshot) {
        let mut inner = self.inner.write();
        let baseline = inner
            .baselines
            .entry(snapshot.url.clone())
            .or_insert_with(|| PerformanceBaseline::new(snapshot.url.clone()));
        baseline.observe(snapshot.timing.avg);
        inner.performance.insert(snapshot.url.clone(), snapshot);
    }

    pub fn performance_for(&self, url: &str) -> Option<(PerformanceSnapshot, PerformanceBaseline)> {
        let inner = self.inner.read();
        let snap = inner.performance.get(url).cloned()?;
        let baseline = inner.baselines.get(url).cloned()?;
        Some((snap, baseline))
    }

    pub fn clear_performance(&self) {
        let mut inner = self.inner.write();
        inner.performance.clear();
        inner.baselines.clear();
    }

    // -- bulk clear / health ----------------------------------------------------

    /// Drops all in-memory capture state. Returns the number of entries
    /// removed across all buffers.
    pub fn clear_all(&self) -> usize {
        let mut inner = self.inner.write();
        let removed = inner.network_bodies.len()
            + inner.ws_events.len()
            + inner.actions.len()
            + inner.conns.active.len()
            + inner.conns.closed.len();
        inner.network_bodies.clear();
        inner.network_added_at.clear();
        inner.ws_events.clear();
        inner.ws_added_at.clear();
        inner.actions.clear();
        inner.actions_added_at.clear();
        inner.conns.active.clear();
        inner.conns.active_order.clear();
        inner.conns.closed.clear();
        inner.performance.clear();
        inner.baselines.clear();
        removed
    }

    /// All network bodies paired with ingest time, oldest first — used by
    /// the diff engine and the timeline/HAR generators.
    pub fn network_bodies_with_time(&self) -> Vec<(DateTime<Utc>, NetworkBody)> {
        let inner = self.inner.read();
        inner
            .network_added_at
            .iter()
            .cloned()
            .zip(inner.network_bodies.iter().cloned())
            .collect()
    }

    pub fn ws_events_with_time(&self) -> Vec<(DateTime<Utc>, WebSocketEvent)> {
        let inner = self.inner.read();
        inner
            .ws_added_at
            .iter()
            .cloned()
            .zip(inner.ws_events.iter().cloned())
            .collect()
    }

    pub fn actions_with_time(&self) -> Vec<(DateTime<Utc>, EnhancedAction)> {
        let inner = self.inner.read();
        inner
            .actions_added_at
            .iter()
            .cloned()
            .zip(inner.actions.iter().cloned())
            .collect()
    }

    pub fn health(&self) -> HealthSnapshot {
        let inner = self.inner.read();
        HealthSnapshot {
            network_bodies: inner.network_bodies.len(),
            ws_events: inner.ws_events.len(),
            actions: inner.actions.len(),
            active_connections: inner.conns.active.len(),
            closed_connections: inner.conns.closed.len(),
            minimal_mode: self.minimal_mode,
        }
    }
}

/// One-pass FIFO eviction to a hard entry-count cap, pruning the parallel
/// `added_at` slice in lockstep.
fn evict_by_count<T>(entries: &mut Vec<T>, added_at: &mut Vec<DateTime<Utc>>, max: usize) {
    if entries.len() > max {
        let drop_count = entries.len() - max;
        entries.drain(0..drop_count);
        added_at.drain(0..drop_count);
    }
}

/// Drop the oldest entries whose `added_at` has exceeded the TTL. Entries
/// are FIFO-ordered so expired ones are always a prefix.
fn evict_by_ttl<T>(entries: &mut Vec<T>, added_at: &mut Vec<DateTime<Utc>>, ttl_secs: u64) {
    let cutoff = Utc::now() - chrono::Duration::seconds(ttl_secs as i64);
    let mut drop_count = 0;
    while drop_count < added_at.len() && added_at[drop_count] < cutoff {
        drop_count += 1;
    }
    if drop_count > 0 {
        entries.drain(0..drop_count);
        added_at.drain(0..drop_count);
    }
}

/// One-pass memory eviction: drop oldest entries until total approximate
/// size is under the per-buffer cap.
fn evict_by_memory<T>(
    entries: &mut Vec<T>,
    added_at: &mut Vec<DateTime<Utc>>,
    limit_bytes: usize,
    size_of: impl Fn(&T) -> usize,
) {
    let mut total: usize = entries.iter().map(&size_of).sum();
    let mut drop_count = 0;
    while total > limit_bytes && drop_count < entries.len() {
        total -= size_of(&entries[drop_count]);
        drop_count += 1;
    }
    if drop_count > 0 {
        entries.drain(0..drop_count);
        added_at.drain(0..drop_count);
    }
}

fn truncate_body(body: &mut NetworkBody, config: &CaptureConfig) {
    if let Some(req) = &body.request_body {
        let s = serde_json::to_string(req).unwrap_or_default();
        if s.len() > config.request_body_truncate_bytes {
            body.request_truncated = true;
            body.request_body = Some(serde_json::Value::String(
                s.chars()
                    .take(config.request_body_truncate_bytes)
                    .collect(),
            ));
        }
    }
    if let Some(resp) = &body.response_body {
        let s = serde_json::to_string(resp).unwrap_or_default();
        if s.len() > config.response_body_truncate_bytes {
            body.response_truncated = true;
            body.response_body = Some(serde_json::Value::String(
                s.chars()
                    .take(config.response_body_truncate_bytes)
                    .collect(),
            ));
        }
    }
    if body.binary_format.is_none() {
        let (fmt, confidence) = detect_binary_format(body);
        body.binary_format = fmt;
        body.format_confidence = confidence;
    }
}

/// Best-effort magic-byte/shape fingerprint of a response body.
fn detect_binary_format(body: &NetworkBody) -> (Option<String>, Option<f64>) {
    let Some(ct) = &body.content_type else {
        return (None, None);
    };
    if ct.contains("json") {
        (Some("json".into()), Some(1.0))
    } else if ct.contains("image/png") {
        (Some("png".into()), Some(0.9))
    } else if ct.contains("image") {
        (Some("image".into()), Some(0.6))
    } else {
        (None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Arc<CaptureStore> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        CaptureStore::new(CaptureConfig::default(), false, tx)
    }

    fn body(method: &str, url: &str, status: u16) -> NetworkBody {
        NetworkBody {
            method: method.into(),
            url: url.into(),
            status: Some(status),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn network_filter_by_url_substring() {
        let store = store();
        store.add_network_bodies(vec![
            body("GET", "https://x/api/users", 200),
            body("GET", "https://x/static/app.js", 200),
        ]);
        let result = store.get_network_bodies(&NetworkFilter {
            url_contains: Some("api".into()),
            ..Default::default()
        });
        assert_eq!(result.len(), 1);
        assert!(result[0].url.contains("api"));
    }

    #[tokio::test]
    async fn network_buffer_respects_count_cap() {
        let mut cfg = CaptureConfig::default();
        cfg.max_network_bodies = 2;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        let store = CaptureStore::new(cfg, false, tx);
        store.add_network_bodies(vec![
            body("GET", "/a", 200),
            body("GET", "/b", 200),
            body("GET", "/c", 200),
        ]);
        let all = store.get_network_bodies(&NetworkFilter {
            limit: Some(10),
            ..Default::default()
        });
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].url, "/c");
    }

    #[tokio::test]
    async fn clear_all_empties_every_buffer() {
        let store = store();
        store.add_network_bodies(vec![body("GET", "/a", 200)]);
        let removed = store.clear_all();
        assert_eq!(removed, 1);
        assert_eq!(store.health().network_bodies, 0);
    }
}
