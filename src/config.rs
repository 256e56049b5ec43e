//! Configuration for the devconsole backend.
//!
//! Layered the way `symbi-runtime`'s `config.rs` does: a `Default` impl
//! holding spec-mandated defaults, overridable by an optional TOML file and
//! then by environment variables, in that order.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub capture: CaptureConfig,
    pub schema: SchemaConfig,
    pub pending_query: PendingQueryConfig,
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            capture: CaptureConfig::default(),
            schema: SchemaConfig::default(),
            pending_query: PendingQueryConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Maximum accepted request body size in bytes (5 MiB).
    pub max_post_body_size: usize,
    /// Ingest rate limit, requests/second, before returning 429.
    pub ingest_rate_limit_per_sec: u32,
    /// Aggregate process memory cap across all buffers, in bytes, before
    /// ingestion starts returning 503 and discarding batches.
    pub aggregate_memory_limit_bytes: usize,
    /// Shrinks all buffer capacities when enabled ("minimal mode").
    pub minimal_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 7832,
            max_post_body_size: 5 * 1024 * 1024,
            ingest_rate_limit_per_sec: 200,
            aggregate_memory_limit_bytes: 256 * 1024 * 1024,
            minimal_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub max_log_entries: usize,
    pub max_network_bodies: usize,
    pub max_ws_events: usize,
    pub max_actions: usize,
    pub max_active_connections: usize,
    pub max_closed_connections: usize,
    pub request_body_truncate_bytes: usize,
    pub response_body_truncate_bytes: usize,
    pub per_buffer_memory_limit_bytes: usize,
    pub connection_window_secs: u64,
    pub ttl_secs: u64,
    pub max_pending_queries: usize,
    pub default_pending_query_timeout_secs: u64,
    pub max_a11y_cache_entries: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_log_entries: 2000,
            max_network_bodies: 500,
            max_ws_events: 1000,
            max_actions: 1000,
            max_active_connections: 50,
            max_closed_connections: 100,
            request_body_truncate_bytes: 8 * 1024,
            response_body_truncate_bytes: 16 * 1024,
            per_buffer_memory_limit_bytes: 16 * 1024 * 1024,
            connection_window_secs: 5,
            ttl_secs: 3600,
            max_pending_queries: 100,
            default_pending_query_timeout_secs: 10,
            max_a11y_cache_entries: 10,
        }
    }
}

impl CaptureConfig {
    /// Apply `ServerConfig::minimal_mode`'s effective shrink to buffer caps.
    pub fn effective(&self, minimal: bool) -> CaptureConfig {
        if !minimal {
            return self.clone();
        }
        let mut c = self.clone();
        c.max_log_entries /= 4;
        c.max_network_bodies /= 4;
        c.max_ws_events /= 4;
        c.max_actions /= 4;
        c.per_buffer_memory_limit_bytes /= 4;
        c
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub max_schema_endpoints: usize,
    pub max_query_param_values: usize,
    pub max_latency_samples: usize,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            max_schema_endpoints: 150,
            max_query_param_values: 10,
            max_latency_samples: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PendingQueryConfig {
    pub default_timeout_secs: u64,
}

impl Default for PendingQueryConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
    pub screenshots_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("devconsoled");
        Self {
            log_file: base.join("console.ndjson"),
            screenshots_dir: base.join("screenshots"),
            data_dir: base,
        }
    }
}

impl Config {
    /// Load defaults, then an optional TOML file, then environment
    /// overrides. Missing file is not an error; malformed file is.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut cfg = Config::default();
        if let Some(path) = path {
            if path.exists() {
                let text = std::fs::read_to_string(path)?;
                cfg = toml::from_str(&text)?;
            }
        }
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("DEVCONSOLE_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }
        if let Ok(host) = std::env::var("DEVCONSOLE_HOST") {
            self.server.host = host;
        }
        if std::env::var("DEVCONSOLE_MINIMAL").is_ok() {
            self.server.minimal_mode = true;
        }
        if let Ok(dir) = std::env::var("DEVCONSOLE_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_caps() {
        let cfg = Config::default();
        assert_eq!(cfg.capture.request_body_truncate_bytes, 8 * 1024);
        assert_eq!(cfg.capture.response_body_truncate_bytes, 16 * 1024);
        assert_eq!(cfg.schema.max_schema_endpoints, 150);
        assert_eq!(cfg.server.max_post_body_size, 5 * 1024 * 1024);
    }

    #[test]
    fn minimal_mode_shrinks_buffers() {
        let cfg = CaptureConfig::default();
        let shrunk = cfg.effective(true);
        assert!(shrunk.max_log_entries < cfg.max_log_entries);
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let cfg = Config::load(Some(Path::new("/nonexistent/path/devconsoled.toml")));
        assert!(cfg.is_ok());
    }
}
