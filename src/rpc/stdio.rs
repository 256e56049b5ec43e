//! Stdio transport for the JSON-RPC dispatcher: one JSON value per line in
//! on stdin, one JSON value per line out on stdout. No framing beyond the
//! newline — callers that want MCP-over-stdio semantics without the HTTP
//! surface read/write this way.

use crate::AppState;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Read requests from `stdin` line by line until EOF, dispatching each
/// through the same handler the HTTP `/mcp` route uses and writing the
/// response back to `stdout` as a single line. A line that isn't valid JSON
/// gets a JSON-RPC parse-error response rather than killing the loop.
pub async fn run(state: Arc<AppState>) -> io::Result<()> {
    let stdin = io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str(&line) {
            Ok(request) => super::handle_request(&state, request).await,
            Err(e) => serde_json::json!({
                "jsonrpc": "2.0",
                "id": Value::Null,
                "error": {"code": -32700, "message": format!("parse error: {e}")},
            }),
        };
        let mut out = serde_json::to_string(&response).unwrap_or_else(|_| "{}".into());
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn malformed_line_does_not_panic() {
        let state = Arc::new(AppState::new(Config::default()));
        let request = serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"});
        let response = super::super::handle_request(&state, request).await;
        assert_eq!(response["jsonrpc"], "2.0");
    }
}
