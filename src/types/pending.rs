//! `PendingQuery`: a request/response rendezvous record.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingQuery {
    pub id: String,
    #[serde(rename = "type")]
    pub query_type: String,
    pub params: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
}

/// The snapshot shape returned by the extension's poll endpoint
/// (`pending()`) — omits `created_at`/`expires_at`.
#[derive(Debug, Clone, Serialize)]
pub struct PendingQuerySnapshot {
    pub id: String,
    #[serde(rename = "type")]
    pub query_type: String,
    pub params: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<String>,
}

impl From<&PendingQuery> for PendingQuerySnapshot {
    fn from(q: &PendingQuery) -> Self {
        Self {
            id: q.id.clone(),
            query_type: q.query_type.clone(),
            params: q.params.clone(),
            tab_id: q.tab_id.clone(),
        }
    }
}
