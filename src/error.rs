use thiserror::Error;

/// Precondition violations found before a run starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("users must be at least 1")]
    ZeroUsers,
    #[error("iterations mode requires iterations > 0")]
    ZeroIterations,
    #[error("duration mode requires durationSecs > 0")]
    ZeroDuration,
    #[error("stair-step profile requires stepDurationSecs > 0")]
    ZeroStepDuration,
    #[error("target URL is empty")]
    MissingTarget,
    #[error("invalid HTTP method `{0}`")]
    InvalidMethod(String),
    #[error("invalid header `{key}`: {reason}")]
    InvalidHeader { key: String, reason: String },
    #[error("proxy routing requires a proxy endpoint")]
    MissingProxyEndpoint,
    #[error("proxy routing requires an authenticated session")]
    MissingProxySession,
    #[error("invalid monitoring URL: {0}")]
    InvalidMonitoringUrl(String),
}

#[derive(Debug, Error)]
pub enum LoadTestError {
    #[error("invalid load test configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("virtual user task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// A single resource poll that produced no sample.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("metrics request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("metrics endpoint answered HTTP {0}")]
    Status(u16),
    #[error("metrics payload is not {{cpu, memory}} JSON: {0}")]
    Decode(#[from] serde_json::Error),
}
