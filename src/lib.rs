//! devconsoled: a local developer-console backend. Ingests browser
//! telemetry over HTTP and exposes it to AI agents over JSON-RPC.

pub mod a11y;
pub mod capture;
pub mod config;
pub mod diff;
pub mod errors;
pub mod http;
pub mod noise;
pub mod rpc;
pub mod schema_store;
pub mod sequence;
pub mod session_store;
pub mod timeline;
pub mod types;

use crate::a11y::A11yCache;
use crate::capture::{CaptureStore, LogBuffer, PendingQueryEngine};
use crate::config::Config;
use crate::diff::DiffEngine;
use crate::http::IngestRateLimiter;
use crate::noise::NoiseRules;
use crate::schema_store::SchemaStore;
use crate::sequence::SequenceReplayer;
use crate::session_store::{FileSessionStore, SessionStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

/// Every long-lived component, wired once in `main` and shared behind an
/// `Arc` across the HTTP router and the JSON-RPC dispatcher.
pub struct AppState {
    pub config: Config,
    pub logs: Arc<LogBuffer>,
    pub capture: Arc<CaptureStore>,
    pub schema: Arc<SchemaStore>,
    pub pending: Arc<PendingQueryEngine>,
    pub a11y: Arc<A11yCache>,
    pub sessions: Arc<dyn SessionStore>,
    pub noise: Arc<NoiseRules>,
    pub diff: Arc<DiffEngine>,
    pub replayer: Arc<SequenceReplayer>,
    pub ingest_limiter: Arc<IngestRateLimiter>,
}

impl AppState {
    pub fn new(config: Config) -> Arc<Self> {
        let capture_config = config.capture.effective(config.server.minimal_mode);

        let logs = LogBuffer::new(capture_config.max_log_entries, config.storage.log_file.clone());
        let schema = Arc::new(SchemaStore::new(config.schema.clone()));

        let (fanout_tx, mut fanout_rx) = mpsc::unbounded_channel();
        let capture = CaptureStore::new(capture_config.clone(), config.server.minimal_mode, fanout_tx);

        let schema_for_fanout = Arc::clone(&schema);
        tokio::spawn(async move {
            while let Some(body) = fanout_rx.recv().await {
                schema_for_fanout.observe(&body);
            }
        });

        let pending = PendingQueryEngine::new(
            capture_config.max_pending_queries,
            Duration::from_secs(capture_config.default_pending_query_timeout_secs),
        );
        let a11y = Arc::new(A11yCache::new());
        let sessions: Arc<dyn SessionStore> =
            Arc::new(FileSessionStore::new(config.storage.data_dir.clone()));
        let noise = Arc::new(NoiseRules::new());
        let diff = Arc::new(DiffEngine::new());
        let replayer = SequenceReplayer::new();
        let ingest_limiter = Arc::new(IngestRateLimiter::new(config.server.ingest_rate_limit_per_sec));

        Arc::new(Self {
            config,
            logs,
            capture,
            schema,
            pending,
            a11y,
            sessions,
            noise,
            diff,
            replayer,
            ingest_limiter,
        })
    }

    /// Best-effort flush on shutdown; never fatal. Buffer rotation and save
    /// failures here are silently absorbed and logged, not propagated.
    pub async fn shutdown(&self) {
        if let Err(e) = self.sessions.shutdown().await {
            warn!(error = %e, "session store shutdown reported an error");
        }
    }
}
