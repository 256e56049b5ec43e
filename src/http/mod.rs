//! Ingestion endpoints: the fixed HTTP surface the browser extension posts
//! telemetry to, plus `/health` and `/mcp`.

mod rate_limit;

use crate::errors::{ErrorKind, RuntimeError};
use crate::rpc;
use crate::types::{EnhancedAction, LogEntry, NetworkBody, PerformanceSnapshot, WebSocketEvent};
use crate::AppState;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use rate_limit::RateLimiter;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

/// The HTTP-layer error envelope, distinct from the JSON-RPC tool-call
/// error object: the ingestion surface speaks in status codes, not
/// content-level `isError` payloads.
struct ApiError(RuntimeError);

impl From<RuntimeError> for ApiError {
    fn from(e: RuntimeError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::MissingParam | ErrorKind::InvalidParam | ErrorKind::InvalidJson => StatusCode::BAD_REQUEST,
            ErrorKind::NoData => StatusCode::NOT_FOUND,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::MemoryExceeded => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Timeout => StatusCode::REQUEST_TIMEOUT,
            ErrorKind::NotInitialized | ErrorKind::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self.0.to_tool_error())).into_response()
    }
}

fn bad_json(err: impl std::fmt::Display) -> Response {
    ApiError(RuntimeError::InvalidJson(err.to_string())).into_response()
}

fn parse_body<T: serde::de::DeserializeOwned>(bytes: &Bytes) -> Result<T, Response> {
    serde_json::from_slice(bytes).map_err(bad_json)
}

/// Consults the rate limiter then the aggregate memory estimate, in that
/// order: each ingest call gets a clean chance to pass before either check
/// discards the batch.
fn check_ingest_budget(state: &AppState) -> Result<(), ApiError> {
    if !state.ingest_limiter.try_acquire() {
        return Err(ApiError(RuntimeError::RateLimited));
    }
    if aggregate_memory_estimate(state) > state.config.server.aggregate_memory_limit_bytes {
        return Err(ApiError(RuntimeError::MemoryExceeded));
    }
    Ok(())
}

fn aggregate_memory_estimate(state: &AppState) -> usize {
    let net: usize = state.capture.network_bodies_with_time().iter().map(|(_, b)| b.approx_size()).sum();
    let ws: usize = state.capture.ws_events_with_time().iter().map(|(_, e)| e.approx_size()).sum();
    let actions: usize = state
        .capture
        .actions_with_time()
        .iter()
        .map(|(_, a)| serde_json::to_vec(a).map(|v| v.len()).unwrap_or(0))
        .sum();
    net + ws + actions
}

pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.server.max_post_body_size;
    Router::new()
        .route("/logs", post(post_logs).delete(delete_logs))
        .route("/network-bodies", post(post_network_bodies))
        .route("/websocket-events", post(post_websocket_events))
        .route("/enhanced-actions", post(post_enhanced_actions))
        .route(
            "/performance-snapshot",
            get(get_performance_snapshot).post(post_performance_snapshot).delete(delete_performance_snapshot),
        )
        .route("/screenshots", post(post_screenshots))
        .route("/pending-queries", get(get_pending_queries))
        .route("/dom-result", post(post_dom_result))
        .route("/a11y-result", post(post_a11y_result))
        .route("/snapshot", get(get_snapshot))
        .route("/clear", post(post_clear).delete(post_clear))
        .route("/test-boundary", post(post_test_boundary))
        .route("/health", get(get_health))
        .route("/mcp", post(post_mcp))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

// --------------------------------------------------------------- /logs

async fn post_logs(State(state): State<Arc<AppState>>, bytes: Bytes) -> Response {
    #[derive(Deserialize)]
    struct Body {
        entries: Vec<LogEntry>,
    }
    let body: Body = match parse_body(&bytes) {
        Ok(b) => b,
        Err(r) => return r,
    };
    let report = state.logs.add_entries(body.entries);
    Json(json!({"received": report.received})).into_response()
}

async fn delete_logs(State(state): State<Arc<AppState>>) -> Response {
    state.logs.clear();
    Json(json!({"cleared": true})).into_response()
}

// --------------------------------------------------------- /network-bodies

async fn post_network_bodies(State(state): State<Arc<AppState>>, bytes: Bytes) -> Response {
    if let Err(e) = check_ingest_budget(&state) {
        return e.into_response();
    }
    #[derive(Deserialize)]
    struct Body {
        bodies: Vec<NetworkBody>,
    }
    let body: Body = match parse_body(&bytes) {
        Ok(b) => b,
        Err(r) => return r,
    };
    state.capture.add_network_bodies(body.bodies);
    StatusCode::OK.into_response()
}

// ------------------------------------------------------- /websocket-events

async fn post_websocket_events(State(state): State<Arc<AppState>>, bytes: Bytes) -> Response {
    if let Err(e) = check_ingest_budget(&state) {
        return e.into_response();
    }
    #[derive(Deserialize)]
    struct Body {
        events: Vec<WebSocketEvent>,
    }
    let body: Body = match parse_body(&bytes) {
        Ok(b) => b,
        Err(r) => return r,
    };
    state.capture.add_ws_events(body.events);
    StatusCode::OK.into_response()
}

// -------------------------------------------------------- /enhanced-actions

async fn post_enhanced_actions(State(state): State<Arc<AppState>>, bytes: Bytes) -> Response {
    #[derive(Deserialize)]
    struct Body {
        actions: Vec<EnhancedAction>,
    }
    let body: Body = match parse_body(&bytes) {
        Ok(b) => b,
        Err(r) => return r,
    };
    state.capture.add_actions(body.actions);
    StatusCode::OK.into_response()
}

// ----------------------------------------------------- /performance-snapshot

#[derive(Deserialize)]
struct UrlQuery {
    url: Option<String>,
}

async fn get_performance_snapshot(State(state): State<Arc<AppState>>, Query(q): Query<UrlQuery>) -> Response {
    let Some(url) = q.url else {
        return Json(json!({})).into_response();
    };
    match state.capture.performance_for(&url) {
        Some((snapshot, baseline)) => Json(json!({"snapshot": snapshot, "baseline": baseline})).into_response(),
        None => Json(json!({})).into_response(),
    }
}

async fn post_performance_snapshot(State(state): State<Arc<AppState>>, bytes: Bytes) -> Response {
    let snapshot: PerformanceSnapshot = match parse_body(&bytes) {
        Ok(s) => s,
        Err(r) => return r,
    };
    state.capture.record_performance(snapshot);
    StatusCode::OK.into_response()
}

async fn delete_performance_snapshot(State(state): State<Arc<AppState>>) -> Response {
    state.capture.clear_performance();
    Json(json!({"cleared": true})).into_response()
}

// --------------------------------------------------------------- /screenshots

#[derive(Deserialize)]
struct ScreenshotBody {
    data_url: String,
    url: String,
    error_id: String,
    error_type: String,
}

async fn post_screenshots(State(state): State<Arc<AppState>>, bytes: Bytes) -> Response {
    let body: ScreenshotBody = match parse_body(&bytes) {
        Ok(b) => b,
        Err(r) => return r,
    };
    let Some(b64) = body.data_url.splitn(2, "base64,").nth(1) else {
        return ApiError(RuntimeError::InvalidParam { param: "dataUrl".into(), reason: "not a base64 data URL".into() }).into_response();
    };
    let bytes = match base64::Engine::decode(&base64::engine::general_purpose::STANDARD, b64) {
        Ok(b) => b,
        Err(e) => return ApiError(RuntimeError::InvalidParam { param: "dataUrl".into(), reason: e.to_string() }).into_response(),
    };
    let host = url::Url::parse(&body.url).ok().and_then(|u| u.host_str().map(String::from)).unwrap_or_else(|| "unknown-host".into());
    let filename = format!("{host}-{}-{}-{}.jpg", Utc::now().timestamp_millis(), body.error_type, body.error_id);
    let path = state.config.storage.screenshots_dir.join(&filename);
    let write_path = path.clone();
    let result = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        if let Some(parent) = write_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&write_path, bytes)
    })
    .await;
    match result {
        Ok(Ok(())) => Json(json!({"filename": filename})).into_response(),
        Ok(Err(e)) => {
            warn!(error = %e, "failed to write screenshot");
            ApiError(RuntimeError::Io(e.to_string())).into_response()
        }
        Err(e) => ApiError(RuntimeError::Io(e.to_string())).into_response(),
    }
}

// ------------------------------------------------------------ /pending-queries

async fn get_pending_queries(State(state): State<Arc<AppState>>) -> Response {
    Json(json!({"queries": state.pending.pending()})).into_response()
}

// -------------------------------------------------- /dom-result, /a11y-result

#[derive(Deserialize)]
struct ResultBody {
    id: String,
    result: Value,
}

async fn resolve_pending(State(state): State<Arc<AppState>>, bytes: Bytes) -> Response {
    let body: ResultBody = match parse_body(&bytes) {
        Ok(b) => b,
        Err(r) => return r,
    };
    match state.pending.resolve(&body.id, body.result) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn post_dom_result(state: State<Arc<AppState>>, bytes: Bytes) -> Response {
    resolve_pending(state, bytes).await
}

async fn post_a11y_result(state: State<Arc<AppState>>, bytes: Bytes) -> Response {
    resolve_pending(state, bytes).await
}

// ------------------------------------------------------------------ /snapshot

#[derive(Deserialize)]
struct SinceQuery {
    since: Option<String>,
}

async fn get_snapshot(State(state): State<Arc<AppState>>, Query(q): Query<SinceQuery>) -> Response {
    let since: Option<DateTime<Utc>> = q.since.as_deref().and_then(|s| {
        DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc))
    });

    let logs = state.logs.entries(None, since);
    let networks: Vec<_> = state
        .capture
        .network_bodies_with_time()
        .into_iter()
        .filter(|(t, _)| since.map(|s| *t >= s).unwrap_or(true))
        .map(|(_, b)| b)
        .collect();
    let ws_events: Vec<_> = state
        .capture
        .ws_events_with_time()
        .into_iter()
        .filter(|(t, _)| since.map(|s| *t >= s).unwrap_or(true))
        .map(|(_, e)| e)
        .collect();
    let actions: Vec<_> = state
        .capture
        .actions_with_time()
        .into_iter()
        .filter(|(t, _)| since.map(|s| *t >= s).unwrap_or(true))
        .map(|(_, a)| a)
        .collect();
    let health = state.capture.health();

    Json(json!({
        "logs": logs,
        "network_bodies": networks,
        "websocket_events": ws_events,
        "actions": actions,
        "stats": health,
    }))
    .into_response()
}

// --------------------------------------------------------------------- /clear

async fn post_clear(State(state): State<Arc<AppState>>) -> Response {
    let removed = state.capture.clear_all();
    state.logs.clear();
    Json(json!({"cleared": true, "entries_removed": removed})).into_response()
}

// --------------------------------------------------------------- /test-boundary

#[derive(Deserialize, serde::Serialize)]
struct TestBoundaryBody {
    test_id: String,
    action: String,
}

async fn post_test_boundary(bytes: Bytes) -> Response {
    let body: TestBoundaryBody = match parse_body(&bytes) {
        Ok(b) => b,
        Err(r) => return r,
    };
    if body.action != "start" && body.action != "end" {
        return ApiError(RuntimeError::InvalidParam { param: "action".into(), reason: "must be `start` or `end`".into() }).into_response();
    }
    Json(body).into_response()
}

// --------------------------------------------------------------------- /health

async fn get_health(State(state): State<Arc<AppState>>) -> Response {
    Json(json!({"status": "ok", "capture": state.capture.health(), "logs": state.logs.len()})).into_response()
}

// ------------------------------------------------------------------------ /mcp

async fn post_mcp(State(state): State<Arc<AppState>>, bytes: Bytes) -> Response {
    let request: Value = match parse_body(&bytes) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let response = rpc::handle_request(&state, request).await;
    Json(response).into_response()
}

pub use rate_limit::RateLimiter as IngestRateLimiter;
