//! Performance snapshots and exponentially-smoothed baselines.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TimingPercentiles {
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub url: String,
    pub ts: Option<String>,
    pub timing: TimingPercentiles,
    pub network_summary: NetworkSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NetworkSummary {
    pub request_count: u64,
    pub error_count: u64,
    pub total_bytes: u64,
}

/// Running mean of the first `n < BASELINE_WARMUP_SAMPLES` samples, then an
/// exponentially-weighted moving average (0.8 old / 0.2 new).
const BASELINE_WARMUP_SAMPLES: u32 = 5;
const EWMA_OLD_WEIGHT: f64 = 0.8;
const EWMA_NEW_WEIGHT: f64 = 0.2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceBaseline {
    pub url: String,
    pub sample_count: u32,
    pub avg_duration_ms: f64,
}

impl PerformanceBaseline {
    pub fn new(url: String) -> Self {
        Self {
            url,
            sample_count: 0,
            avg_duration_ms: 0.0,
        }
    }

    pub fn observe(&mut self, duration_ms: f64) {
        if self.sample_count < BASELINE_WARMUP_SAMPLES {
            let n = self.sample_count as f64;
            self.avg_duration_ms = (self.avg_duration_ms * n + duration_ms) / (n + 1.0);
        } else {
            self.avg_duration_ms =
                self.avg_duration_ms * EWMA_OLD_WEIGHT + duration_ms * EWMA_NEW_WEIGHT;
        }
        self.sample_count += 1;
    }

    /// True when `duration_ms` is at least 3x this baseline.
    pub fn is_degraded(&self, duration_ms: f64) -> bool {
        self.avg_duration_ms > 0.0 && duration_ms >= self.avg_duration_ms * 3.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warmup_uses_running_mean() {
        let mut b = PerformanceBaseline::new("x".into());
        b.observe(100.0);
        b.observe(200.0);
        assert!((b.avg_duration_ms - 150.0).abs() < 1e-9);
    }

    #[test]
    fn post_warmup_uses_ewma() {
        let mut b = PerformanceBaseline::new("x".into());
        for _ in 0..5 {
            b.observe(100.0);
        }
        b.observe(200.0);
        assert!((b.avg_duration_ms - (100.0 * 0.8 + 200.0 * 0.2)).abs() < 1e-9);
    }

    #[test]
    fn degraded_at_3x() {
        let mut b = PerformanceBaseline::new("x".into());
        for _ in 0..5 {
            b.observe(100.0);
        }
        assert!(b.is_degraded(300.0));
        assert!(!b.is_degraded(299.0));
    }
}
