//! `LogEntry`: an open mapping from string keys to arbitrary JSON values,
//! with typed accessors for the conventional keys.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Maximum serialized size of a single log entry (1 MiB).
pub const MAX_LOG_ENTRY_BYTES: usize = 1024 * 1024;

pub const VALID_LEVELS: &[&str] = &["error", "warn", "info", "debug", "log"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogEntry {
    pub fields: Map<String, Value>,
}

impl LogEntry {
    pub fn level(&self) -> Option<&str> {
        self.fields.get("level").and_then(Value::as_str)
    }

    pub fn message(&self) -> Option<&str> {
        self.fields.get("message").and_then(Value::as_str)
    }

    pub fn ts(&self) -> Option<&str> {
        self.fields.get("ts").and_then(Value::as_str)
    }

    /// `level` present and in the allowed set, `message` present.
    pub fn is_valid(&self) -> bool {
        let level_ok = self
            .level()
            .map(|l| VALID_LEVELS.contains(&l))
            .unwrap_or(false);
        level_ok && self.message().is_some()
    }

    pub fn serialized_len(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(level: &str, message: &str) -> LogEntry {
        let Value::Object(fields) = json!({"level": level, "message": message}) else {
            unreachable!()
        };
        LogEntry { fields }
    }

    #[test]
    fn valid_levels_pass() {
        for level in VALID_LEVELS {
            assert!(entry(level, "hi").is_valid());
        }
    }

    #[test]
    fn invalid_level_rejected() {
        assert!(!entry("invalid", "hi").is_valid());
    }

    #[test]
    fn missing_message_rejected() {
        let Value::Object(fields) = json!({"level": "error"}) else {
            unreachable!()
        };
        assert!(!LogEntry { fields }.is_valid());
    }
}
