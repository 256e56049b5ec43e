//! Error taxonomy for the devconsole backend.
//!
//! Internal failures are modeled with `thiserror` the way the rest of the
//! ambient stack does; at the JSON-RPC boundary they collapse into the
//! smaller public [`ErrorKind`] taxonomy from the tool-call contract, which
//! is what an agent actually sees.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Internal error type threaded through the capture store, schema store,
/// pending-query engine and friends.
#[derive(Debug, Error, Clone)]
pub enum RuntimeError {
    #[error("missing required parameter: {0}")]
    MissingParam(String),

    #[error("invalid parameter {param}: {reason}")]
    InvalidParam { param: String, reason: String },

    #[error("no data: {0}")]
    NoData(String),

    #[error("internal dependency not initialized: {0}")]
    NotInitialized(String),

    #[error("rate limited")]
    RateLimited,

    #[error("memory limit exceeded")]
    MemoryExceeded,

    #[error("timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error("unknown {kind}: {name}")]
    Unknown { kind: &'static str, name: String },

    #[error("invalid json: {0}")]
    InvalidJson(String),

    #[error("io error: {0}")]
    Io(String),
}

/// The small public taxonomy of error *kinds* an agent can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidJson,
    MissingParam,
    InvalidParam,
    NoData,
    NotInitialized,
    RateLimited,
    MemoryExceeded,
    Timeout,
    Unknown,
}

impl RuntimeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RuntimeError::MissingParam(_) => ErrorKind::MissingParam,
            RuntimeError::InvalidParam { .. } => ErrorKind::InvalidParam,
            RuntimeError::NoData(_) => ErrorKind::NoData,
            RuntimeError::NotInitialized(_) => ErrorKind::NotInitialized,
            RuntimeError::RateLimited => ErrorKind::RateLimited,
            RuntimeError::MemoryExceeded => ErrorKind::MemoryExceeded,
            RuntimeError::Timeout { .. } => ErrorKind::Timeout,
            RuntimeError::Unknown { .. } => ErrorKind::Unknown,
            RuntimeError::InvalidJson(_) => ErrorKind::InvalidJson,
            RuntimeError::Io(_) => ErrorKind::Unknown,
        }
    }

    /// The structured `{error_kind, message, hint, param?}` object placed in
    /// tool-call text content on semantic failure.
    pub fn to_tool_error(&self) -> ToolError {
        let param = match self {
            RuntimeError::MissingParam(p) => Some(p.clone()),
            RuntimeError::InvalidParam { param, .. } => Some(param.clone()),
            _ => None,
        };
        ToolError {
            error_kind: self.kind(),
            message: self.to_string(),
            hint: self.hint(),
            param,
        }
    }

    fn hint(&self) -> String {
        match self {
            RuntimeError::MissingParam(p) => format!("supply the `{p}` argument"),
            RuntimeError::InvalidParam { param, .. } => {
                format!("check the value passed for `{param}` against the tool schema")
            }
            RuntimeError::NoData(_) => "nothing has been captured for this query yet".into(),
            RuntimeError::NotInitialized(_) => {
                "internal dependency missing; this should not happen in production".into()
            }
            RuntimeError::RateLimited => "slow down ingestion and retry shortly".into(),
            RuntimeError::MemoryExceeded => {
                "the process memory cap was hit; the batch was discarded".into()
            }
            RuntimeError::Timeout { elapsed } => {
                format!("no response arrived within the deadline ({elapsed:?} elapsed)")
            }
            RuntimeError::Unknown { kind, .. } => format!("unrecognized {kind}"),
            RuntimeError::InvalidJson(_) => "request body was not valid JSON".into(),
            RuntimeError::Io(_) => "an internal I/O error occurred".into(),
        }
    }
}

/// The JSON object carried in `MCPToolResult` text content on semantic error.
#[derive(Debug, Clone, Serialize)]
pub struct ToolError {
    pub error_kind: ErrorKind,
    pub message: String,
    pub hint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_param_carries_param_name() {
        let err = RuntimeError::MissingParam("what".into());
        let tool_err = err.to_tool_error();
        assert_eq!(tool_err.error_kind, ErrorKind::MissingParam);
        assert_eq!(tool_err.param.as_deref(), Some("what"));
    }

    #[test]
    fn timeout_hint_mentions_elapsed() {
        let err = RuntimeError::Timeout {
            elapsed: Duration::from_secs(5),
        };
        assert!(err.to_tool_error().hint.contains("5s") || err.to_tool_error().hint.contains("elapsed"));
    }
}
