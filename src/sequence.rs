//! 4.L Sequence replay: saved interact-action lists, serialized globally
//! across the whole process so concurrent replays can't interleave.

use crate::errors::{Result, RuntimeError};
use crate::session_store::SessionStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

pub const MAX_STEPS: usize = 50;
pub const MAX_NAME_LEN: usize = 64;
const NAMESPACE: &str = "sequences";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedSequence {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub saved_at: String,
    pub step_count: usize,
    pub steps: Vec<Value>,
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Whatever actually drives an interact step (normally the JSON-RPC
/// dispatcher's `interact`-shaped handlers). Kept abstract here so the
/// replay loop has no dependency on the dispatcher.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute_step(&self, step: &Value) -> Result<Value>;
}

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub step_index: usize,
    pub action: Value,
    pub status: StepStatus,
    pub duration_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayStatus {
    Ok,
    Partial,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayResult {
    pub steps_executed: usize,
    pub steps_failed: usize,
    pub status: ReplayStatus,
    pub outcomes: Vec<StepOutcome>,
}

#[derive(Debug, Clone, Default)]
pub struct ReplayOptions {
    pub continue_on_error: Option<bool>,
    pub override_steps: Option<Vec<Option<Value>>>,
    pub stop_after_step: Option<usize>,
}

pub async fn save_sequence(
    store: &dyn SessionStore,
    name: String,
    description: Option<String>,
    tags: Vec<String>,
    steps: Vec<Value>,
    saved_at: String,
) -> Result<SavedSequence> {
    if !valid_name(&name) {
        return Err(RuntimeError::InvalidParam {
            param: "name".into(),
            reason: format!(
                "must be 1-{MAX_NAME_LEN} chars matching ^[a-zA-Z0-9_-]+$"
            ),
        });
    }
    if steps.len() > MAX_STEPS {
        return Err(RuntimeError::InvalidParam {
            param: "steps".into(),
            reason: format!("at most {MAX_STEPS} steps allowed, got {}", steps.len()),
        });
    }
    let sequence = SavedSequence {
        name: name.clone(),
        description,
        tags,
        saved_at,
        step_count: steps.len(),
        steps,
    };
    store
        .save(NAMESPACE, &name, serde_json::to_value(&sequence).unwrap())
        .await?;
    Ok(sequence)
}

pub async fn list_sequences(store: &dyn SessionStore) -> Result<Vec<String>> {
    store.list(NAMESPACE).await
}

pub async fn get_sequence(store: &dyn SessionStore, name: &str) -> Result<SavedSequence> {
    let value = store
        .load(NAMESPACE, name)
        .await?
        .ok_or_else(|| RuntimeError::NoData(format!("sequence `{name}` not found")))?;
    serde_json::from_value(value).map_err(|e| RuntimeError::InvalidJson(e.to_string()))
}

pub async fn delete_sequence(store: &dyn SessionStore, name: &str) -> Result<()> {
    store.delete(NAMESPACE, name).await
}

/// Process-wide replay guard: only one sequence replays at a time.
pub struct SequenceReplayer {
    guard: Mutex<()>,
}

impl SequenceReplayer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { guard: Mutex::new(()) })
    }

    /// Replay `name`, returning a structured error if another replay is
    /// already in flight rather than queueing behind it.
    pub async fn replay(
        &self,
        store: &dyn SessionStore,
        executor: &dyn StepExecutor,
        name: &str,
        options: ReplayOptions,
    ) -> Result<ReplayResult> {
        let _permit = self
            .guard
            .try_lock()
            .map_err(|_| RuntimeError::InvalidParam {
                param: "name".into(),
                reason: "a sequence replay is already in progress".into(),
            })?;

        let sequence = get_sequence(store, name).await?;
        let mut steps = sequence.steps;

        if let Some(overrides) = options.override_steps {
            if overrides.len() != steps.len() {
                return Err(RuntimeError::InvalidParam {
                    param: "override_steps".into(),
                    reason: format!(
                        "must be the same length as the stored sequence ({})",
                        steps.len()
                    ),
                });
            }
            for (slot, replacement) in steps.iter_mut().zip(overrides) {
                if let Some(replacement) = replacement {
                    *slot = replacement;
                }
            }
        }

        if let Some(stop_after) = options.stop_after_step {
            steps.truncate(stop_after);
        }

        let continue_on_error = options.continue_on_error.unwrap_or(true);
        let mut outcomes = Vec::with_capacity(steps.len());
        let mut failed = 0usize;

        for (index, step) in steps.iter().enumerate() {
            let start = Instant::now();
            let outcome = match executor.execute_step(step).await {
                Ok(_) => StepOutcome {
                    step_index: index,
                    action: step.clone(),
                    status: StepStatus::Ok,
                    duration_ms: start.elapsed().as_millis(),
                    error: None,
                },
                Err(e) => {
                    failed += 1;
                    StepOutcome {
                        step_index: index,
                        action: step.clone(),
                        status: StepStatus::Error,
                        duration_ms: start.elapsed().as_millis(),
                        error: Some(e.to_string()),
                    }
                }
            };
            let should_break = outcome.status == StepStatus::Error && !continue_on_error;
            outcomes.push(outcome);
            if should_break {
                break;
            }
        }

        let status = if failed == 0 {
            ReplayStatus::Ok
        } else if failed == outcomes.len() {
            ReplayStatus::Error
        } else {
            ReplayStatus::Partial
        };

        Ok(ReplayResult {
            steps_executed: outcomes.len(),
            steps_failed: failed,
            status,
            outcomes,
        })
    }
}

impl Default for SequenceReplayer {
    fn default() -> Self {
        Self { guard: Mutex::new(()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_store::FileSessionStore;
    use serde_json::json;

    struct AlwaysOk;
    #[async_trait]
    impl StepExecutor for AlwaysOk {
        async fn execute_step(&self, _step: &Value) -> Result<Value> {
            Ok(json!({}))
        }
    }

    struct FailsOn(usize);
    #[async_trait]
    impl StepExecutor for FailsOn {
        async fn execute_step(&self, step: &Value) -> Result<Value> {
            if step["i"].as_u64() == Some(self.0 as u64) {
                Err(RuntimeError::NoData("boom".into()))
            } else {
                Ok(json!({}))
            }
        }
    }

    fn store(dir: &tempfile::TempDir) -> FileSessionStore {
        FileSessionStore::new(dir.path().to_path_buf())
    }

    #[test]
    fn invalid_names_rejected() {
        assert!(!valid_name(""));
        assert!(!valid_name("has space"));
        assert!(!valid_name(&"x".repeat(MAX_NAME_LEN + 1)));
        assert!(valid_name("login-flow_1"));
    }

    #[tokio::test]
    async fn saving_too_many_steps_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let steps: Vec<Value> = (0..MAX_STEPS + 1).map(|i| json!({"i": i})).collect();
        let result = save_sequence(&store, "too-long".into(), None, vec![], steps, "now".into()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn replay_all_steps_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let steps = vec![json!({"i": 0}), json!({"i": 1})];
        save_sequence(&store, "login".into(), None, vec![], steps, "now".into())
            .await
            .unwrap();
        let replayer = SequenceReplayer::new();
        let result = replayer
            .replay(&store, &AlwaysOk, "login", ReplayOptions::default())
            .await
            .unwrap();
        assert_eq!(result.steps_executed, 2);
        assert_eq!(result.steps_failed, 0);
        assert_eq!(result.status, ReplayStatus::Ok);
    }

    #[tokio::test]
    async fn continue_on_error_false_stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let steps = vec![json!({"i": 0}), json!({"i": 1}), json!({"i": 2})];
        save_sequence(&store, "seq".into(), None, vec![], steps, "now".into())
            .await
            .unwrap();
        let replayer = SequenceReplayer::new();
        let options = ReplayOptions {
            continue_on_error: Some(false),
            ..Default::default()
        };
        let result = replayer.replay(&store, &FailsOn(1), "seq", options).await.unwrap();
        assert_eq!(result.steps_executed, 2);
        assert_eq!(result.steps_failed, 1);
        assert_eq!(result.status, ReplayStatus::Partial);
    }

    #[tokio::test]
    async fn stop_after_step_caps_execution() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let steps = vec![json!({"i": 0}), json!({"i": 1}), json!({"i": 2})];
        save_sequence(&store, "seq".into(), None, vec![], steps, "now".into())
            .await
            .unwrap();
        let replayer = SequenceReplayer::new();
        let options = ReplayOptions {
            stop_after_step: Some(1),
            ..Default::default()
        };
        let result = replayer.replay(&store, &AlwaysOk, "seq", options).await.unwrap();
        assert_eq!(result.steps_executed, 1);
    }

    #[tokio::test]
    async fn override_steps_replaces_matching_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let steps = vec![json!({"i": 0}), json!({"i": 1})];
        save_sequence(&store, "seq".into(), None, vec![], steps, "now".into())
            .await
            .unwrap();
        let replayer = SequenceReplayer::new();
        let options = ReplayOptions {
            override_steps: Some(vec![None, Some(json!({"i": 99}))]),
            ..Default::default()
        };
        let result = replayer.replay(&store, &AlwaysOk, "seq", options).await.unwrap();
        assert_eq!(result.outcomes[1].action, json!({"i": 99}));
    }
}
