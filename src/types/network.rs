//! Network body, WebSocket event, and connection-state types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NetworkBody {
    pub ts: Option<String>,
    pub method: String,
    pub url: String,
    pub status: Option<u16>,
    #[serde(default)]
    pub request_body: Option<Value>,
    #[serde(default)]
    pub response_body: Option<Value>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<f64>,
    #[serde(default)]
    pub request_truncated: bool,
    #[serde(default)]
    pub response_truncated: bool,
    #[serde(default)]
    pub binary_format: Option<String>,
    #[serde(default)]
    pub format_confidence: Option<f64>,
}

impl NetworkBody {
    pub fn is_error(&self) -> bool {
        self.status.map(|s| s >= 400).unwrap_or(false)
    }

    /// Rough in-memory footprint used by the per-buffer memory cap.
    pub fn approx_size(&self) -> usize {
        let body_len = |v: &Option<Value>| {
            v.as_ref()
                .map(|v| serde_json::to_string(v).map(|s| s.len()).unwrap_or(0))
                .unwrap_or(0)
        };
        self.url.len() + self.method.len() + body_len(&self.request_body) + body_len(&self.response_body) + 64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WsEventKind {
    Open,
    Close,
    Error,
    Message,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WsDirection {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketEvent {
    pub ts: Option<String>,
    pub event: WsEventKind,
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub direction: Option<WsDirection>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub size: Option<usize>,
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub sampled: Option<bool>,
}

impl WebSocketEvent {
    pub fn approx_size(&self) -> usize {
        self.id.len()
            + self.url.as_ref().map(|u| u.len()).unwrap_or(0)
            + self.size.unwrap_or(0)
            + 32
    }

    /// Close codes other than the normal-closure code (1000).
    pub fn is_abnormal_close(&self) -> bool {
        matches!(self.event, WsEventKind::Close) && self.code.map(|c| c != 1000).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnState {
    Open,
    Error,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DirectionStats {
    pub total: u64,
    pub bytes: u64,
    pub last_at: Option<i64>,
    pub last_data: Option<Value>,
    #[serde(skip)]
    pub recent_times: VecDeque<i64>,
}

impl DirectionStats {
    /// Messages observed within the rolling window, used for messages/sec.
    pub fn messages_per_second(&self, window_secs: u64, now_ms: i64) -> f64 {
        let window_ms = (window_secs * 1000) as i64;
        let count = self
            .recent_times
            .iter()
            .filter(|t| now_ms - **t <= window_ms)
            .count();
        if window_secs == 0 {
            0.0
        } else {
            count as f64 / window_secs as f64
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionState {
    pub id: String,
    pub url: Option<String>,
    pub state: ConnState,
    pub opened_at: i64,
    pub incoming: DirectionStats,
    pub outgoing: DirectionStats,
    #[serde(default)]
    pub sampling: Option<bool>,
    #[serde(default)]
    pub closed_at: Option<i64>,
    #[serde(default)]
    pub close_code: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abnormal_close_detected() {
        let ev = WebSocketEvent {
            ts: None,
            event: WsEventKind::Close,
            id: "c1".into(),
            url: None,
            direction: None,
            data: None,
            size: None,
            code: Some(1006),
            reason: None,
            sampled: None,
        };
        assert!(ev.is_abnormal_close());
    }

    #[test]
    fn normal_close_not_abnormal() {
        let ev = WebSocketEvent {
            ts: None,
            event: WsEventKind::Close,
            id: "c1".into(),
            url: None,
            direction: None,
            data: None,
            size: None,
            code: Some(1000),
            reason: None,
            sampled: None,
        };
        assert!(!ev.is_abnormal_close());
    }
}
