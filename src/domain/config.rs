use crate::error::ConfigError;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadTestConfig {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub data_driven_body: Option<DataDrivenBody>,
    pub users: u32,
    pub run_mode: RunMode,
    #[serde(default)]
    pub pacing_ms: u64,
    #[serde(default)]
    pub load_profile: LoadProfile,
    #[serde(default)]
    pub graceful_shutdown_secs: u64,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub headers: Vec<HeaderEntry>,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
    #[serde(default)]
    pub id_injection: IdInjection,
    #[serde(default)]
    pub proxy: Option<ProxyRoute>,
    #[serde(default)]
    pub network_diagnostics: bool,
    #[serde(default)]
    pub monitoring_url: Option<String>,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    #[serde(default)]
    pub transport: TransportConfig,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "mode",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum RunMode {
    Duration { duration_secs: u64 },
    Iterations { iterations: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum LoadProfile {
    RampUp {
        ramp_up_secs: u64,
    },
    StairStep {
        initial_users: u32,
        step_users: u32,
        step_duration_secs: u64,
    },
}

impl Default for LoadProfile {
    fn default() -> Self {
        LoadProfile::RampUp { ramp_up_secs: 0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataReplayMode {
    #[default]
    Loop,
    Strict,
}

/// Pre-rendered request bodies replayed instead of the static template.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataDrivenBody {
    pub records: Vec<String>,
    #[serde(default)]
    pub mode: DataReplayMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderEntry {
    pub key: String,
    pub value: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssertionMetric {
    Latency,
    ResponseBody,
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssertionOperator {
    LessThan,
    GreaterThan,
    Contains,
    NotContains,
    #[serde(other)]
    Unsupported,
}

/// A declarative check run against every completed request.
///
/// `value` is kept as raw JSON so that a malformed threshold surfaces as a
/// failed assertion at evaluation time instead of rejecting the whole config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assertion {
    pub metric: AssertionMetric,
    pub operator: AssertionOperator,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdPoolMode {
    #[default]
    Sequential,
    Random,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdInjection {
    #[serde(default = "default_true")]
    pub auto_increment: bool,
    #[serde(default)]
    pub pool: Vec<serde_json::Value>,
    #[serde(default)]
    pub pool_mode: IdPoolMode,
}

impl Default for IdInjection {
    fn default() -> Self {
        Self {
            auto_increment: true,
            pool: Vec::new(),
            pool_mode: IdPoolMode::Sequential,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRoute {
    pub endpoint: String,
    #[serde(default)]
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportConfig {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub follow_redirects: bool,
    #[serde(default = "default_true")]
    pub verify_ssl: bool,
    #[serde(default = "default_true")]
    pub keep_alive: bool,
    #[serde(default)]
    pub proxy_url: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            follow_redirects: true,
            verify_ssl: true,
            keep_alive: true,
            proxy_url: None,
        }
    }
}

impl LoadTestConfig {
    /// Minimal config hitting `url` with `GET`; everything else at its default.
    pub fn new(url: impl Into<String>, users: u32, run_mode: RunMode) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            body: String::new(),
            data_driven_body: None,
            users,
            run_mode,
            pacing_ms: 0,
            load_profile: LoadProfile::default(),
            graceful_shutdown_secs: 0,
            endpoints: Vec::new(),
            auth_token: None,
            headers: Vec::new(),
            assertions: Vec::new(),
            id_injection: IdInjection::default(),
            proxy: None,
            network_diagnostics: false,
            monitoring_url: None,
            variables: HashMap::new(),
            transport: TransportConfig::default(),
        }
    }

    /// Endpoints the virtual users pick from; the single configured target
    /// when no multi-endpoint list is present.
    pub fn targets(&self) -> Vec<Endpoint> {
        if self.endpoints.is_empty() {
            vec![Endpoint {
                url: self.url.clone(),
                method: self.method.clone(),
            }]
        } else {
            self.endpoints.clone()
        }
    }

    /// The monitoring endpoint, if one is set. Blank means monitoring is off.
    pub fn monitoring_url(&self) -> Option<&str> {
        self.monitoring_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.users == 0 {
            return Err(ConfigError::ZeroUsers);
        }

        match self.run_mode {
            RunMode::Duration { duration_secs: 0 } => return Err(ConfigError::ZeroDuration),
            RunMode::Iterations { iterations: 0 } => return Err(ConfigError::ZeroIterations),
            _ => {}
        }

        if let LoadProfile::StairStep {
            step_duration_secs: 0,
            ..
        } = self.load_profile
        {
            return Err(ConfigError::ZeroStepDuration);
        }

        for target in self.targets() {
            if target.url.trim().is_empty() {
                return Err(ConfigError::MissingTarget);
            }
            Method::from_bytes(target.method.as_bytes())
                .map_err(|_| ConfigError::InvalidMethod(target.method.clone()))?;
        }

        for header in self.headers.iter().filter(|header| header.enabled) {
            if header.key.is_empty() {
                continue;
            }
            HeaderName::from_bytes(header.key.as_bytes()).map_err(|err| {
                ConfigError::InvalidHeader {
                    key: header.key.clone(),
                    reason: err.to_string(),
                }
            })?;
            HeaderValue::from_str(&header.value).map_err(|err| ConfigError::InvalidHeader {
                key: header.key.clone(),
                reason: err.to_string(),
            })?;
        }

        if let Some(proxy) = &self.proxy {
            if proxy.endpoint.trim().is_empty() {
                return Err(ConfigError::MissingProxyEndpoint);
            }
            let has_session = proxy
                .session_token
                .as_deref()
                .map(str::trim)
                .is_some_and(|token| !token.is_empty());
            if !has_session {
                return Err(ConfigError::MissingProxySession);
            }
        }

        if let Some(url) = self.monitoring_url() {
            reqwest::Url::parse(url)
                .map_err(|err| ConfigError::InvalidMonitoringUrl(err.to_string()))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_duration_stair_step_config() {
        let raw = r#"{
            "url": "https://api.example.com/items",
            "method": "POST",
            "body": "{\"id\": 0}",
            "users": 10,
            "runMode": {"mode": "duration", "durationSecs": 30},
            "pacingMs": 250,
            "loadProfile": {"type": "stair_step", "initialUsers": 2, "stepUsers": 2, "stepDurationSecs": 5},
            "gracefulShutdownSecs": 3,
            "headers": [{"key": "X-Trace", "value": "on", "enabled": false}],
            "assertions": [{"metric": "latency", "operator": "lessThan", "value": 100}],
            "idInjection": {"pool": ["a", "b"], "poolMode": "random"}
        }"#;

        let config: LoadTestConfig = serde_json::from_str(raw).expect("parse config");
        assert_eq!(config.run_mode, RunMode::Duration { duration_secs: 30 });
        assert_eq!(
            config.load_profile,
            LoadProfile::StairStep {
                initial_users: 2,
                step_users: 2,
                step_duration_secs: 5
            }
        );
        assert!(!config.headers[0].enabled);
        assert_eq!(config.assertions[0].metric, AssertionMetric::Latency);
        assert!(config.id_injection.auto_increment);
        assert_eq!(config.id_injection.pool_mode, IdPoolMode::Random);
        assert!(config.transport.follow_redirects);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_assertion_operator_still_parses() {
        let raw = r#"{"metric": "latency", "operator": "between", "value": "10..20"}"#;
        let assertion: Assertion = serde_json::from_str(raw).expect("parse assertion");
        assert_eq!(assertion.operator, AssertionOperator::Unsupported);
    }

    #[test]
    fn targets_fall_back_to_single_url() {
        let config = LoadTestConfig::new(
            "https://example.com",
            1,
            RunMode::Iterations { iterations: 1 },
        );
        assert_eq!(
            config.targets(),
            vec![Endpoint {
                url: "https://example.com".to_string(),
                method: "GET".to_string()
            }]
        );
    }

    #[test]
    fn validate_rejects_precondition_violations() {
        let base = LoadTestConfig::new(
            "https://example.com",
            1,
            RunMode::Iterations { iterations: 5 },
        );

        let mut config = base.clone();
        config.users = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroUsers)));

        let mut config = base.clone();
        config.run_mode = RunMode::Duration { duration_secs: 0 };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroDuration)));

        let mut config = base.clone();
        config.load_profile = LoadProfile::StairStep {
            initial_users: 1,
            step_users: 1,
            step_duration_secs: 0,
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroStepDuration)));

        let mut config = base.clone();
        config.method = "NOT A METHOD".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidMethod(_))));

        let mut config = base.clone();
        config.headers.push(HeaderEntry {
            key: "Bad Header".to_string(),
            value: "x".to_string(),
            enabled: true,
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidHeader { .. })
        ));

        let mut config = base;
        config.proxy = Some(ProxyRoute {
            endpoint: "https://proxy.example.com/forward".to_string(),
            session_token: Some("  ".to_string()),
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingProxySession)
        ));
    }

    #[test]
    fn blank_monitoring_url_disables_monitoring() {
        let raw = r#"{
            "url": "https://example.com",
            "users": 1,
            "runMode": {"mode": "iterations", "iterations": 1},
            "monitoringUrl": "  "
        }"#;
        let config: LoadTestConfig = serde_json::from_str(raw).expect("parse config");
        assert_eq!(config.monitoring_url(), None);
        assert!(config.validate().is_ok());

        let mut config = config;
        config.monitoring_url = Some(String::new());
        assert!(config.validate().is_ok());

        config.monitoring_url = Some("not a url".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidMonitoringUrl(_))
        ));
    }

    #[test]
    fn disabled_invalid_header_is_ignored() {
        let mut config = LoadTestConfig::new(
            "https://example.com",
            1,
            RunMode::Iterations { iterations: 1 },
        );
        config.headers.push(HeaderEntry {
            key: "Bad Header".to_string(),
            value: "x".to_string(),
            enabled: false,
        });
        assert!(config.validate().is_ok());
    }
}
