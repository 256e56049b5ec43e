//! Connection-state tracking driven by observed WebSocket events.

use crate::types::{ConnState, ConnectionState, DirectionStats, WebSocketEvent, WsDirection, WsEventKind};
use chrono::Utc;
use std::collections::{HashMap, VecDeque};

pub struct ConnectionTracker {
    pub active: HashMap<String, ConnectionState>,
    pub active_order: VecDeque<String>,
    pub closed: VecDeque<ConnectionState>,
    max_active: usize,
    max_closed: usize,
    window_secs: u64,
}

impl ConnectionTracker {
    pub fn new(max_active: usize, max_closed: usize, window_secs: u64) -> Self {
        Self {
            active: HashMap::new(),
            active_order: VecDeque::new(),
            closed: VecDeque::new(),
            max_active,
            max_closed,
            window_secs,
        }
    }

    pub fn observe(&mut self, event: &WebSocketEvent) {
        match event.event {
            WsEventKind::Open => self.on_open(event),
            WsEventKind::Message => self.on_message(event),
            WsEventKind::Close => self.on_close(event),
            WsEventKind::Error => self.on_error(event),
        }
    }

    fn on_open(&mut self, event: &WebSocketEvent) {
        if self.active.len() >= self.max_active {
            if let Some(oldest) = self.active_order.pop_front() {
                self.active.remove(&oldest);
            }
        }
        let state = ConnectionState {
            id: event.id.clone(),
            url: event.url.clone(),
            state: ConnState::Open,
            opened_at: Utc::now().timestamp_millis(),
            incoming: DirectionStats::default(),
            outgoing: DirectionStats::default(),
            sampling: event.sampled,
            closed_at: None,
            close_code: None,
        };
        self.active_order.push_back(event.id.clone());
        self.active.insert(event.id.clone(), state);
    }

    fn on_message(&mut self, event: &WebSocketEvent) {
        let Some(state) = self.active.get_mut(&event.id) else {
            return;
        };
        let now = Utc::now().timestamp_millis();
        let stats = match event.direction {
            Some(WsDirection::Outgoing) => &mut state.outgoing,
            _ => &mut state.incoming,
        };
        stats.total += 1;
        stats.bytes += event.size.unwrap_or(0) as u64;
        stats.last_at = Some(now);
        stats.last_data = event.data.clone();
        stats.recent_times.push_back(now);
        let window_ms = (self.window_secs * 1000) as i64;
        while let Some(front) = stats.recent_times.front() {
            if now - *front > window_ms {
                stats.recent_times.pop_front();
            } else {
                break;
            }
        }
    }

    fn on_close(&mut self, event: &WebSocketEvent) {
        if let Some(mut state) = self.active.remove(&event.id) {
            self.active_order.retain(|id| id != &event.id);
            state.state = ConnState::Closed;
            state.closed_at = Some(Utc::now().timestamp_millis());
            state.close_code = event.code;
            if self.closed.len() >= self.max_closed {
                self.closed.pop_front();
            }
            self.closed.push_back(state);
        }
    }

    fn on_error(&mut self, event: &WebSocketEvent) {
        if let Some(state) = self.active.get_mut(&event.id) {
            state.state = ConnState::Error;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(kind: WsEventKind, id: &str) -> WebSocketEvent {
        WebSocketEvent {
            ts: None,
            event: kind,
            id: id.into(),
            url: Some("ws://x".into()),
            direction: Some(WsDirection::Incoming),
            data: None,
            size: Some(10),
            code: None,
            reason: None,
            sampled: None,
        }
    }

    #[test]
    fn open_then_close_moves_to_closed() {
        let mut t = ConnectionTracker::new(10, 10, 5);
        t.observe(&ev(WsEventKind::Open, "c1"));
        assert_eq!(t.active.len(), 1);
        let mut close = ev(WsEventKind::Close, "c1");
        close.code = Some(1006);
        t.observe(&close);
        assert_eq!(t.active.len(), 0);
        assert_eq!(t.closed.len(), 1);
        assert_eq!(t.closed[0].close_code, Some(1006));
    }

    #[test]
    fn error_keeps_connection_active() {
        let mut t = ConnectionTracker::new(10, 10, 5);
        t.observe(&ev(WsEventKind::Open, "c1"));
        t.observe(&ev(WsEventKind::Error, "c1"));
        assert_eq!(t.active.len(), 1);
        assert_eq!(t.active["c1"].state, ConnState::Error);
    }

    #[test]
    fn open_evicts_oldest_when_at_capacity() {
        let mut t = ConnectionTracker::new(1, 10, 5);
        t.observe(&ev(WsEventKind::Open, "c1"));
        t.observe(&ev(WsEventKind::Open, "c2"));
        assert_eq!(t.active.len(), 1);
        assert!(t.active.contains_key("c2"));
        assert!(!t.active.contains_key("c1"));
    }

    #[test]
    fn message_bumps_direction_counters() {
        let mut t = ConnectionTracker::new(10, 10, 5);
        t.observe(&ev(WsEventKind::Open, "c1"));
        t.observe(&ev(WsEventKind::Message, "c1"));
        assert_eq!(t.active["c1"].incoming.total, 1);
        assert_eq!(t.active["c1"].incoming.bytes, 10);
    }
}
