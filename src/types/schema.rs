//! Schema-store data model: per-endpoint accumulators of observed
//! request/response shapes, timing, and query-parameter usage.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Serialize)]
pub struct TimingStats {
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    pub max: f64,
}

impl TimingStats {
    pub fn from_samples(samples: &VecDeque<f64>) -> Self {
        if samples.is_empty() {
            return TimingStats {
                avg: 0.0,
                p50: 0.0,
                p95: 0.0,
                max: 0.0,
            };
        }
        let mut sorted: Vec<f64> = samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let sum: f64 = sorted.iter().sum();
        let avg = sum / sorted.len() as f64;
        let percentile = |p: f64| -> f64 {
            let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
            sorted[idx.min(sorted.len() - 1)]
        };
        TimingStats {
            avg,
            p50: percentile(0.50),
            p95: percentile(0.95),
            max: *sorted.last().unwrap(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FieldFormat {
    Uuid,
    Datetime,
    Email,
    Url,
    Integer,
    Number,
    Boolean,
    String,
    Null,
    Array,
    Object,
}

impl FieldFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldFormat::Uuid => "uuid",
            FieldFormat::Datetime => "datetime",
            FieldFormat::Email => "email",
            FieldFormat::Url => "url",
            FieldFormat::Integer => "integer",
            FieldFormat::Number => "number",
            FieldFormat::Boolean => "boolean",
            FieldFormat::String => "string",
            FieldFormat::Null => "null",
            FieldFormat::Array => "array",
            FieldFormat::Object => "object",
        }
    }
}

/// Per-field type/format vote accumulator.
#[derive(Debug, Clone, Default)]
pub struct FieldStat {
    pub type_votes: HashMap<String, u64>,
    pub format_votes: HashMap<String, u64>,
    pub seen_count: u64,
}

impl FieldStat {
    pub fn observe(&mut self, type_name: &str, format: Option<FieldFormat>) {
        self.seen_count += 1;
        *self.type_votes.entry(type_name.to_string()).or_insert(0) += 1;
        if let Some(format) = format {
            *self
                .format_votes
                .entry(format.as_str().to_string())
                .or_insert(0) += 1;
        }
    }

    /// Majority type vote; null breaks ties only if it is the majority.
    pub fn majority_type(&self) -> Option<String> {
        let max = self.type_votes.values().copied().max()?;
        let mut winners: Vec<&String> = self
            .type_votes
            .iter()
            .filter(|(_, &c)| c == max)
            .map(|(k, _)| k)
            .collect();
        winners.sort();
        winners.into_iter().next().cloned()
    }

    pub fn majority_format(&self) -> Option<String> {
        self.format_votes
            .iter()
            .max_by_key(|(_, &c)| c)
            .map(|(k, _)| k.clone())
    }

    pub fn required(&self, observation_count: u64) -> bool {
        if observation_count == 0 {
            return false;
        }
        (self.seen_count as f64 / observation_count as f64) >= 0.9
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FieldStatSummary {
    #[serde(rename = "type")]
    pub field_type: Option<String>,
    pub format: Option<String>,
    pub required: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Shape {
    pub fields: HashMap<String, FieldStat>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ShapeSummary {
    pub fields: HashMap<String, FieldStatSummary>,
}

#[derive(Debug, Clone, Default)]
pub struct QueryParamStat {
    pub appearances: u64,
    pub sample_values: VecDeque<String>,
    pub type_votes: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryParamSummary {
    pub name: String,
    pub required: bool,
    #[serde(rename = "type")]
    pub field_type: Option<String>,
    pub sample_values: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SchemaEndpoint {
    pub method: String,
    pub path_pattern: String,
    pub observation_count: u64,
    pub last_path: String,
    pub request_shape: Option<Shape>,
    /// status code -> response shape
    pub response_shapes: HashMap<u16, Shape>,
    pub query_params: HashMap<String, QueryParamStat>,
    pub path_params: Vec<String>,
    pub latency_samples: VecDeque<f64>,
    pub error_count: u64,
}

impl SchemaEndpoint {
    pub fn new(method: String, path_pattern: String) -> Self {
        Self {
            method,
            path_pattern,
            observation_count: 0,
            last_path: String::new(),
            request_shape: None,
            response_shapes: HashMap::new(),
            query_params: HashMap::new(),
            path_params: Vec::new(),
            latency_samples: VecDeque::new(),
            error_count: 0,
        }
    }

    pub fn timing(&self) -> TimingStats {
        TimingStats::from_samples(&self.latency_samples)
    }

    pub fn coverage_error_rate(&self) -> f64 {
        if self.observation_count == 0 {
            0.0
        } else {
            self.error_count as f64 / self.observation_count as f64
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaEndpointSummary {
    pub method: String,
    pub path_pattern: String,
    pub observation_count: u64,
    pub last_path: String,
    pub request_shape: Option<ShapeSummary>,
    pub response_shapes: HashMap<String, ShapeSummary>,
    pub query_params: Vec<QueryParamSummary>,
    pub path_params: Vec<String>,
    pub timing: TimingStats,
    pub coverage: CoverageSummary,
    pub auth_pattern: Option<AuthPattern>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoverageSummary {
    pub error_rate: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthPattern {
    Bearer,
    Basic,
    Session,
}
