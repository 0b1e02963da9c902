use super::sample::NetworkTimings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApdexBreakdown {
    pub satisfied: f64,
    pub tolerating: f64,
    pub frustrated: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TtfbStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub std_dev: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LatencyPercentiles {
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TimeseriesPoint {
    pub bucket_ts_ms: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub latency_avg_ms: f64,
    pub latency_p95_ms: f64,
}

/// Snapshot derived from a sample list; recomputed from scratch on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TestStats {
    pub total_requests: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub avg_response_time: f64,
    pub min_response_time: f64,
    pub max_response_time: f64,
    pub throughput: f64,
    pub error_distribution: BTreeMap<String, u64>,
    pub std_dev: f64,
    pub coefficient_of_variation: f64,
    pub apdex_score: f64,
    pub apdex_breakdown: ApdexBreakdown,
    #[serde(default)]
    pub network_timings: Option<NetworkTimings>,
    #[serde(default)]
    pub ttfb: Option<TtfbStats>,
    pub percentiles: LatencyPercentiles,
    #[serde(default)]
    pub status_code_counts: BTreeMap<String, u64>,
    #[serde(default)]
    pub timeseries: Vec<TimeseriesPoint>,
}
