use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResult {
    pub passed: bool,
    pub actual: String,
    pub expected: String,
    pub description: String,
}

/// Per-request network breakdown, all values in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NetworkTimings {
    pub dns_ms: f64,
    pub tcp_ms: f64,
    pub tls_ms: f64,
    pub ttfb_ms: f64,
    pub download_ms: f64,
    pub total_ms: f64,
}

/// Outcome of one request attempt. Created once by the executor and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResultSample {
    pub id: String,
    #[serde(default)]
    pub request_index: Option<u64>,
    pub timestamp_ms: u64,
    pub latency_ms: f64,
    pub success: bool,
    pub status_code: u16,
    pub status_text: String,
    #[serde(default)]
    pub error: Option<String>,
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub request_body: Option<String>,
    #[serde(default)]
    pub response_body: Option<String>,
    #[serde(default)]
    pub assertions: Vec<AssertionResult>,
    #[serde(default)]
    pub network_timings: Option<NetworkTimings>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSample {
    pub timestamp_ms: u64,
    pub cpu: f64,
    pub memory: f64,
}
