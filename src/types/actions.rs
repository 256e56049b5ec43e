//! `EnhancedAction`: user-interaction records.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const REDACTED_PLACEHOLDER: &str = "[redacted]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Click,
    Input,
    Keypress,
    Navigate,
    Select,
    Scroll,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancedAction {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub ts_ms: i64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub selectors: HashMap<String, String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub input_type: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub from_url: Option<String>,
    #[serde(default)]
    pub to_url: Option<String>,
    #[serde(default)]
    pub selected_value: Option<String>,
    #[serde(default)]
    pub scroll_y: Option<f64>,
}

impl EnhancedAction {
    /// Replace password values with the literal redaction placeholder,
    /// idempotently.
    pub fn redact_password(&mut self) {
        if self.input_type.as_deref() == Some("password") {
            if self.value.as_deref() != Some(REDACTED_PLACEHOLDER) {
                self.value = Some(REDACTED_PLACEHOLDER.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn password_action(value: &str) -> EnhancedAction {
        EnhancedAction {
            action_type: ActionType::Input,
            ts_ms: 0,
            url: None,
            selectors: HashMap::new(),
            value: Some(value.into()),
            input_type: Some("password".into()),
            key: None,
            from_url: None,
            to_url: None,
            selected_value: None,
            scroll_y: None,
        }
    }

    #[test]
    fn password_value_redacted() {
        let mut a = password_action("hunter2");
        a.redact_password();
        assert_eq!(a.value.as_deref(), Some(REDACTED_PLACEHOLDER));
    }

    #[test]
    fn redaction_is_idempotent() {
        let mut a = password_action("hunter2");
        a.redact_password();
        a.redact_password();
        assert_eq!(a.value.as_deref(), Some(REDACTED_PLACEHOLDER));
    }

    #[test]
    fn non_password_untouched() {
        let mut a = password_action("hello");
        a.input_type = Some("text".into());
        a.redact_password();
        assert_eq!(a.value.as_deref(), Some("hello"));
    }
}
