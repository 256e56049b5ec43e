//! 4.D Schema store: per-endpoint accumulator inferring request/response
//! shapes, timing percentiles, and query-parameter patterns from observed
//! network bodies. Guarded by its own lock, disjoint from the capture
//! store's, so schema fan-out never blocks ingest.

use crate::config::SchemaConfig;
use crate::types::{
    AuthPattern, CoverageSummary, FieldFormat, FieldStatSummary, NetworkBody, QueryParamSummary,
    SchemaEndpoint, SchemaEndpointSummary, Shape, ShapeSummary,
};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use url::Url;

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .unwrap()
});
static HEX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-fA-F]{16,}$").unwrap());
static DIGITS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+$").unwrap());
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

/// Deterministic, ordered path parameterization.
pub fn parameterize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if segment.is_empty() {
                segment.to_string()
            } else if UUID_RE.is_match(segment) {
                "{uuid}".to_string()
            } else if HEX_RE.is_match(segment) {
                "{hash}".to_string()
            } else if DIGITS_RE.is_match(segment) {
                "{id}".to_string()
            } else {
                segment.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn path_params_of(pattern: &str) -> Vec<String> {
    pattern
        .split('/')
        .filter(|s| s.starts_with('{') && s.ends_with('}'))
        .map(|s| s.trim_matches(|c| c == '{' || c == '}').to_string())
        .collect()
}

fn detect_field_format(value: &Value) -> (String, Option<FieldFormat>) {
    match value {
        Value::Null => ("null".to_string(), Some(FieldFormat::Null)),
        Value::Bool(_) => ("boolean".to_string(), Some(FieldFormat::Boolean)),
        Value::Array(_) => ("array".to_string(), Some(FieldFormat::Array)),
        Value::Object(_) => ("object".to_string(), Some(FieldFormat::Object)),
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                ("integer".to_string(), Some(FieldFormat::Integer))
            } else {
                ("number".to_string(), Some(FieldFormat::Number))
            }
        }
        Value::String(s) => {
            let format = if UUID_RE.is_match(s) {
                FieldFormat::Uuid
            } else if chrono::DateTime::parse_from_rfc3339(s).is_ok() {
                FieldFormat::Datetime
            } else if EMAIL_RE.is_match(s) {
                FieldFormat::Email
            } else if Url::parse(s).is_ok() && (s.starts_with("http://") || s.starts_with("https://")) {
                FieldFormat::Url
            } else {
                FieldFormat::String
            };
            ("string".to_string(), Some(format))
        }
    }
}

fn observe_shape(shape: &mut Shape, value: &Value) {
    let Value::Object(map) = value else { return };
    for (key, v) in map {
        let (type_name, format) = detect_field_format(v);
        shape.fields.entry(key.clone()).or_default().observe(&type_name, format);
    }
}

fn summarize_shape(shape: &Shape, observation_count: u64) -> ShapeSummary {
    let fields = shape
        .fields
        .iter()
        .map(|(name, stat)| {
            (
                name.clone(),
                FieldStatSummary {
                    field_type: stat.majority_type(),
                    format: stat.majority_format(),
                    required: stat.required(observation_count),
                },
            )
        })
        .collect();
    ShapeSummary { fields }
}

struct Inner {
    endpoints: HashMap<(String, String), SchemaEndpoint>,
}

pub struct SchemaStore {
    inner: Mutex<Inner>,
    config: SchemaConfig,
}

#[derive(Debug, Default, Clone)]
pub struct SchemaFilter {
    pub method: Option<String>,
    pub path_contains: Option<String>,
}

impl SchemaStore {
    pub fn new(config: SchemaConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                endpoints: HashMap::new(),
            }),
            config,
        }
    }

    /// Accumulate one observed network body under the endpoint keyed by
    /// `(method, parameterized path)`. New endpoints beyond
    /// `max_schema_endpoints` are silently dropped.
    pub fn observe(&self, body: &NetworkBody) {
        let path = Url::parse(&body.url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| body.url.clone());
        let pattern = parameterize_path(&path);
        let key = (body.method.to_uppercase(), pattern.clone());

        let mut inner = self.inner.lock();
        if !inner.endpoints.contains_key(&key) && inner.endpoints.len() >= self.config.max_schema_endpoints {
            return;
        }
        let endpoint = inner
            .endpoints
            .entry(key)
            .or_insert_with(|| {
                let mut e = SchemaEndpoint::new(body.method.to_uppercase(), pattern.clone());
                e.path_params = path_params_of(&pattern);
                e
            });

        endpoint.observation_count += 1;
        endpoint.last_path = path.clone();
        if body.is_error() {
            endpoint.error_count += 1;
        }

        if endpoint.latency_samples.len() >= self.config.max_latency_samples {
            endpoint.latency_samples.pop_front();
        }
        if let Some(duration) = body.duration_ms {
            endpoint.latency_samples.push_back(duration);
        }

        if let Some(Value::Object(_)) = &body.request_body {
            let shape = endpoint.request_shape.get_or_insert_with(Shape::default);
            observe_shape(shape, body.request_body.as_ref().unwrap());
        }
        if let (Some(status), Some(resp)) = (body.status, &body.response_body) {
            if matches!(resp, Value::Object(_)) {
                let shape = endpoint.response_shapes.entry(status).or_default();
                observe_shape(shape, resp);
            }
        }

        if let Ok(url) = Url::parse(&body.url) {
            for (key, value) in url.query_pairs() {
                let stat = endpoint.query_params.entry(key.to_string()).or_default();
                stat.appearances += 1;
                let type_name = if DIGITS_RE.is_match(&value) {
                    "integer"
                } else {
                    "string"
                };
                *stat.type_votes.entry(type_name.to_string()).or_insert(0) += 1;
                if stat.sample_values.len() < self.config.max_query_param_values
                    && !stat.sample_values.contains(&value.to_string())
                {
                    stat.sample_values.push_back(value.to_string());
                }
            }
        }
    }

    pub fn endpoint_count(&self) -> usize {
        self.inner.lock().endpoints.len()
    }

    /// Ordered (by observation count desc) endpoint summaries with derived
    /// statistics.
    pub fn build_schema(&self, filter: &SchemaFilter) -> Vec<SchemaEndpointSummary> {
        let inner = self.inner.lock();
        let mut endpoints: Vec<&SchemaEndpoint> = inner
            .endpoints
            .values()
            .filter(|e| filter.method.as_ref().map(|m| e.method.eq_ignore_ascii_case(m)).unwrap_or(true))
            .filter(|e| {
                filter
                    .path_contains
                    .as_ref()
                    .map(|p| e.path_pattern.contains(p.as_str()))
                    .unwrap_or(true)
            })
            .collect();
        endpoints.sort_by(|a, b| b.observation_count.cmp(&a.observation_count));

        endpoints
            .into_iter()
            .map(|endpoint| {
                let query_params = endpoint
                    .query_params
                    .iter()
                    .map(|(name, stat)| QueryParamSummary {
                        name: name.clone(),
                        required: (stat.appearances as f64 / endpoint.observation_count as f64) >= 0.9,
                        field_type: stat.type_votes.iter().max_by_key(|(_, c)| **c).map(|(t, _)| t.clone()),
                        sample_values: stat.sample_values.iter().cloned().collect(),
                    })
                    .collect();
                SchemaEndpointSummary {
                    method: endpoint.method.clone(),
                    path_pattern: endpoint.path_pattern.clone(),
                    observation_count: endpoint.observation_count,
                    last_path: endpoint.last_path.clone(),
                    request_shape: endpoint
                        .request_shape
                        .as_ref()
                        .map(|s| summarize_shape(s, endpoint.observation_count)),
                    response_shapes: endpoint
                        .response_shapes
                        .iter()
                        .map(|(status, shape)| {
                            (status.to_string(), summarize_shape(shape, endpoint.observation_count))
                        })
                        .collect(),
                    query_params,
                    path_params: endpoint.path_params.clone(),
                    timing: endpoint.timing(),
                    coverage: CoverageSummary {
                        error_rate: endpoint.coverage_error_rate(),
                    },
                    auth_pattern: auth_pattern_for(endpoint),
                }
            })
            .collect()
    }

    /// Deterministic textual OpenAPI 3.0 stub.
    pub fn build_openapi_stub(&self, filter: &SchemaFilter) -> String {
        let schema = self.build_schema(filter);
        let mut out = String::from("openapi: \"3.0.0\"\ninfo:\n  title: Observed API\n  version: \"1.0.0\"\npaths:\n");
        let mut by_path: HashMap<&str, Vec<&SchemaEndpointSummary>> = HashMap::new();
        for endpoint in &schema {
            by_path.entry(&endpoint.path_pattern).or_default().push(endpoint);
        }
        let mut paths: Vec<&&str> = by_path.keys().collect();
        paths.sort();
        for path in paths {
            out.push_str(&format!("  {}:\n", path));
            let mut methods = by_path[path].clone();
            methods.sort_by(|a, b| a.method.cmp(&b.method));
            for endpoint in methods {
                out.push_str(&format!("    {}:\n", endpoint.method.to_lowercase()));
                out.push_str("      responses:\n");
                let mut statuses: Vec<&String> = endpoint.response_shapes.keys().collect();
                statuses.sort();
                for status in statuses {
                    out.push_str(&format!("        \"{}\":\n", status));
                    out.push_str("          description: observed response\n");
                }
                if endpoint.response_shapes.is_empty() {
                    out.push_str("        \"200\":\n          description: observed response\n");
                }
            }
        }
        out
    }
}

fn auth_pattern_for(endpoint: &SchemaEndpoint) -> Option<AuthPattern> {
    let path_matches = ["/auth/", "/login", "/signin"]
        .iter()
        .any(|needle| endpoint.last_path.contains(needle) || endpoint.path_pattern.contains(needle));
    let has_401 = endpoint.response_shapes.keys().any(|&status| status == 401);
    if !path_matches && !has_401 {
        return None;
    }
    Some(AuthPattern::Bearer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parameterize_replaces_uuid_hash_and_id_segments() {
        assert_eq!(
            parameterize_path("/users/550e8400-e29b-41d4-a716-446655440000"),
            "/users/{uuid}"
        );
        assert_eq!(parameterize_path("/users/42"), "/users/{id}");
        assert_eq!(
            parameterize_path("/blobs/abcdef0123456789abcdef"),
            "/blobs/{hash}"
        );
        assert_eq!(parameterize_path("/users/me"), "/users/me");
    }

    #[test]
    fn parameterize_is_idempotent() {
        let p = parameterize_path("/users/42/550e8400-e29b-41d4-a716-446655440000");
        assert_eq!(parameterize_path(&p), p);
    }

    #[test]
    fn query_param_required_when_always_present() {
        let store = SchemaStore::new(SchemaConfig::default());
        for page in 1..=10 {
            let body = NetworkBody {
                method: "GET".into(),
                url: format!("https://api.example.com/api/users?page={page}"),
                status: Some(200),
                ..Default::default()
            };
            store.observe(&body);
        }
        let schema = store.build_schema(&SchemaFilter::default());
        assert_eq!(schema.len(), 1);
        let param = &schema[0].query_params[0];
        assert_eq!(param.name, "page");
        assert!(param.required);
        assert_eq!(param.field_type.as_deref(), Some("integer"));
        assert!(param.sample_values.len() <= SchemaConfig::default().max_query_param_values);
    }

    #[test]
    fn endpoint_cap_drops_new_endpoints_silently() {
        let mut cfg = SchemaConfig::default();
        cfg.max_schema_endpoints = 1;
        let store = SchemaStore::new(cfg);
        store.observe(&NetworkBody {
            method: "GET".into(),
            url: "https://x/a".into(),
            status: Some(200),
            ..Default::default()
        });
        store.observe(&NetworkBody {
            method: "GET".into(),
            url: "https://x/b".into(),
            status: Some(200),
            ..Default::default()
        });
        assert_eq!(store.endpoint_count(), 1);
    }

    #[test]
    fn response_shape_field_required_and_type_voted() {
        let store = SchemaStore::new(SchemaConfig::default());
        for _ in 0..10 {
            store.observe(&NetworkBody {
                method: "GET".into(),
                url: "https://x/api/users".into(),
                status: Some(200),
                response_body: Some(json!({"id": 1, "name": "a"})),
                ..Default::default()
            });
        }
        let schema = store.build_schema(&SchemaFilter::default());
        let shape = schema[0].response_shapes.get("200").unwrap();
        assert!(shape.fields["id"].required);
        assert_eq!(shape.fields["id"].field_type.as_deref(), Some("integer"));
    }

    #[test]
    fn openapi_stub_is_deterministic_and_well_formed() {
        let store = SchemaStore::new(SchemaConfig::default());
        store.observe(&NetworkBody {
            method: "GET".into(),
            url: "https://x/api/users".into(),
            status: Some(200),
            ..Default::default()
        });
        let stub1 = store.build_openapi_stub(&SchemaFilter::default());
        let stub2 = store.build_openapi_stub(&SchemaFilter::default());
        assert_eq!(stub1, stub2);
        assert!(stub1.starts_with("openapi: \"3.0.0\""));
    }
}
