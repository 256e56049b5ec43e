//! 4.G Noise and redaction: fixed at-ingest rules plus user-configurable
//! noise patterns applied on read.

use crate::types::EnhancedAction;
use parking_lot::RwLock;
use regex::Regex;
use serde::Serialize;

/// Header names treated as secrets at ingest, matched case-insensitively.
const SECRET_HEADER_NAMES: &[&str] = &["authorization", "proxy-authorization", "cookie"];

/// Redact well-known auth headers from a request/response header map,
/// unconditionally.
pub fn redact_headers(headers: &mut serde_json::Map<String, serde_json::Value>) {
    for key in headers.keys().cloned().collect::<Vec<_>>() {
        if SECRET_HEADER_NAMES.contains(&key.to_lowercase().as_str()) {
            headers.insert(key, serde_json::Value::String("[redacted]".into()));
        }
    }
}

pub fn redact_action(action: &mut EnhancedAction) {
    action.redact_password();
}

#[derive(Debug, Clone, Serialize)]
pub struct NoiseRule {
    pub id: String,
    pub pattern: String,
}

/// User-configurable noise rules, applied on read so toggling a rule never
/// loses the underlying captured data.
pub struct NoiseRules {
    inner: RwLock<Vec<(NoiseRule, Regex)>>,
}

impl NoiseRules {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Vec::new()),
        }
    }

    pub fn add(&self, id: String, pattern: String) -> Result<(), regex::Error> {
        let regex = Regex::new(&pattern)?;
        self.inner.write().push((NoiseRule { id, pattern }, regex));
        Ok(())
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut inner = self.inner.write();
        let before = inner.len();
        inner.retain(|(rule, _)| rule.id != id);
        inner.len() != before
    }

    pub fn list(&self) -> Vec<NoiseRule> {
        self.inner.read().iter().map(|(r, _)| r.clone()).collect()
    }

    /// True if `text` matches any configured noise pattern and should be
    /// filtered out of read results.
    pub fn is_noise(&self, text: &str) -> bool {
        self.inner.read().iter().any(|(_, re)| re.is_match(text))
    }
}

impl Default for NoiseRules {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn auth_header_redacted() {
        let serde_json::Value::Object(mut headers) =
            json!({"Authorization": "Bearer abc", "X-Other": "keep"})
        else {
            unreachable!()
        };
        redact_headers(&mut headers);
        assert_eq!(headers["Authorization"], json!("[redacted]"));
        assert_eq!(headers["X-Other"], json!("keep"));
    }

    #[test]
    fn noise_rule_filters_matching_text_only_after_add() {
        let rules = NoiseRules::new();
        assert!(!rules.is_noise("healthcheck ping"));
        rules.add("r1".into(), "healthcheck".into()).unwrap();
        assert!(rules.is_noise("healthcheck ping"));
        assert!(!rules.is_noise("real error"));
    }

    #[test]
    fn removing_rule_stops_filtering_but_data_is_unaffected() {
        let rules = NoiseRules::new();
        rules.add("r1".into(), "noisy".into()).unwrap();
        assert!(rules.is_noise("noisy thing"));
        assert!(rules.remove("r1"));
        assert!(!rules.is_noise("noisy thing"));
    }
}
