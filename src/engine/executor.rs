use crate::domain::{Endpoint, LoadTestConfig, ProxyRoute, TestResultSample};
use crate::engine::assertion::evaluate_all;
use crate::engine::cancel::StopSignal;
use crate::engine::http::{
    bearer_header, build_client, build_headers, proxy_envelope, request_headers, should_send_body,
};
use crate::engine::template::{inject_dynamic_id, interpolate, select_record, BodySelection};
use crate::engine::timing::{RequestTimeline, TimelineProbe, TimingProbe};
use crate::error::{ConfigError, LoadTestError};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

const MAX_STORED_BODY_BYTES: usize = 8 * 1024;

pub const ABORTED_STATUS_TEXT: &str = "Aborted";
pub const NETWORK_ERROR_STATUS_TEXT: &str = "Network Error";

/// What one virtual-user iteration produced.
#[derive(Debug, Clone)]
pub enum Attempt {
    Completed(TestResultSample),
    /// Strict data-driven replay ran out of records; nothing was sent.
    Exhausted,
}

impl Attempt {
    pub fn into_sample(self) -> Option<TestResultSample> {
        match self {
            Attempt::Completed(sample) => Some(sample),
            Attempt::Exhausted => None,
        }
    }
}

#[derive(Debug)]
struct Exchange {
    status: StatusCode,
    body: String,
    headers_at: Instant,
}

#[derive(Debug)]
struct TransportFailure {
    status_text: &'static str,
    message: String,
}

impl TransportFailure {
    fn aborted() -> Self {
        Self {
            status_text: ABORTED_STATUS_TEXT,
            message: "Request aborted: the configured deadline was likely exceeded \
                      (timeout or graceful-shutdown window)"
                .to_string(),
        }
    }

    fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::aborted();
        }
        if err.is_connect() || err.is_request() {
            return Self {
                status_text: NETWORK_ERROR_STATUS_TEXT,
                message: format!(
                    "Network error: {err}. The server may be overloaded or refusing \
                     connections, or a CORS policy may be blocking the request"
                ),
            };
        }
        Self {
            status_text: "Error",
            message: err.to_string(),
        }
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or_default()
}

/// Performs single requests for virtual-user iterations. Failures never
/// escape: every attempt that sends something comes back as a sample.
pub struct RequestExecutor {
    client: Client,
    config: Arc<LoadTestConfig>,
    base_headers: HeaderMap,
    bearer: Option<HeaderValue>,
    proxy_bearer: Option<HeaderValue>,
    probe: Arc<dyn TimingProbe>,
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("targets", &self.config.targets())
            .field("proxied", &self.config.proxy.is_some())
            .finish_non_exhaustive()
    }
}

impl RequestExecutor {
    pub fn new(config: Arc<LoadTestConfig>) -> Result<Self, LoadTestError> {
        config.validate()?;
        let client = build_client(&config.transport)?;
        let base_headers = build_headers(
            &config.headers,
            &config.variables,
            config.transport.keep_alive,
        )?;
        let bearer = match config.auth_token.as_deref() {
            Some(token) => bearer_header(token)?,
            None => None,
        };
        let proxy_bearer = match &config.proxy {
            Some(proxy) => {
                let session = proxy.session_token.as_deref().unwrap_or_default();
                Some(bearer_header(session)?.ok_or(ConfigError::MissingProxySession)?)
            }
            None => None,
        };

        Ok(Self {
            client,
            config,
            base_headers,
            bearer,
            proxy_bearer,
            probe: Arc::new(TimelineProbe),
        })
    }

    pub fn with_timing_probe(mut self, probe: Arc<dyn TimingProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn config(&self) -> &LoadTestConfig {
        &self.config
    }

    /// Runs one request for logical request `index` against `endpoint`.
    /// The in-flight request races `hard_stop`.
    pub async fn execute(
        &self,
        index: Option<u64>,
        endpoint: &Endpoint,
        hard_stop: &StopSignal,
    ) -> Attempt {
        let Some(body) = self.resolve_body(index) else {
            return Attempt::Exhausted;
        };

        let url = interpolate(&endpoint.url, &self.config.variables);
        let timestamp_ms = now_ms();
        let sent_at = Instant::now();

        let method = match Method::from_bytes(endpoint.method.as_bytes()) {
            Ok(method) => method,
            Err(err) => {
                let failure = TransportFailure {
                    status_text: "Error",
                    message: format!("Invalid HTTP method `{}`: {err}", endpoint.method),
                };
                return Attempt::Completed(self.failed_sample(
                    index,
                    timestamp_ms,
                    sent_at,
                    &url,
                    &endpoint.method,
                    None,
                    failure,
                ));
            }
        };

        let send_body = Some(body).filter(|body| !body.is_empty() && should_send_body(&method));
        let headers = request_headers(
            &self.base_headers,
            &method,
            send_body.is_some(),
            self.bearer.as_ref(),
        );
        let request = match &self.config.proxy {
            Some(proxy) => self.proxied_request(proxy, &url, &method, &headers, send_body.as_deref()),
            None => Ok(self.direct_request(&url, &method, headers, send_body.clone())),
        };

        let outcome = match request {
            Ok(request) => perform(request, hard_stop).await,
            Err(failure) => Err(failure),
        };
        let finished_at = Instant::now();

        let exchange = match outcome {
            Ok(exchange) => exchange,
            Err(failure) => {
                return Attempt::Completed(self.failed_sample(
                    index,
                    timestamp_ms,
                    sent_at,
                    &url,
                    method.as_str(),
                    send_body,
                    failure,
                ));
            }
        };

        let latency_ms = millis_since(sent_at, finished_at);
        let assertions = evaluate_all(&self.config.assertions, latency_ms, Some(&exchange.body));
        let transport_ok = exchange.status.is_success();
        let success = transport_ok && assertions.iter().all(|result| result.passed);
        let status_text = exchange
            .status
            .canonical_reason()
            .unwrap_or("Unknown")
            .to_string();

        let error = if !transport_ok {
            Some(format!("HTTP {} {status_text}", exchange.status.as_u16()))
        } else if !success {
            let failed: Vec<&str> = assertions
                .iter()
                .filter(|result| !result.passed)
                .map(|result| result.description.as_str())
                .collect();
            Some(format!("Assertion failed: {}", failed.join("; ")))
        } else {
            None
        };

        let network_timings = if self.config.network_diagnostics {
            let timeline = RequestTimeline {
                sent_at,
                headers_at: exchange.headers_at,
                finished_at,
                proxied: self.config.proxy.is_some(),
            };
            self.probe.breakdown(&url, &timeline)
        } else {
            None
        };

        tracing::trace!(
            index,
            status = exchange.status.as_u16(),
            latency_ms,
            success,
            "request completed"
        );

        Attempt::Completed(TestResultSample {
            id: uuid::Uuid::new_v4().to_string(),
            request_index: index,
            timestamp_ms,
            latency_ms,
            success,
            status_code: exchange.status.as_u16(),
            status_text,
            error,
            url,
            method: method.as_str().to_string(),
            request_body: send_body,
            response_body: Some(cap_body(exchange.body)),
            assertions,
            network_timings,
        })
    }

    /// `None` when strict data-driven replay is exhausted.
    fn resolve_body(&self, index: Option<u64>) -> Option<String> {
        if let (Some(data), Some(index)) = (&self.config.data_driven_body, index) {
            return match select_record(data, index) {
                BodySelection::Record(record) => Some(record),
                BodySelection::Exhausted => None,
            };
        }

        let body = interpolate(&self.config.body, &self.config.variables);
        match index {
            Some(index) if !body.trim().is_empty() => {
                Some(inject_dynamic_id(&body, &self.config.id_injection, index))
            }
            _ => Some(body),
        }
    }

    fn direct_request(
        &self,
        url: &str,
        method: &Method,
        headers: HeaderMap,
        body: Option<String>,
    ) -> RequestBuilder {
        let mut request = self.client.request(method.clone(), url).headers(headers);
        if let Some(body) = body {
            request = request.body(body);
        }
        request
    }

    fn proxied_request(
        &self,
        proxy: &ProxyRoute,
        url: &str,
        method: &Method,
        headers: &HeaderMap,
        body: Option<&str>,
    ) -> Result<RequestBuilder, TransportFailure> {
        let envelope = proxy_envelope(url, method, headers, body);
        let payload = serde_json::to_string(&envelope).map_err(|err| TransportFailure {
            status_text: "Error",
            message: format!("Failed to encode proxy request: {err}"),
        })?;
        let mut request = self
            .client
            .post(&proxy.endpoint)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(payload);
        if let Some(bearer) = &self.proxy_bearer {
            request = request.header(AUTHORIZATION, bearer.clone());
        }
        Ok(request)
    }

    #[allow(clippy::too_many_arguments)]
    fn failed_sample(
        &self,
        index: Option<u64>,
        timestamp_ms: u64,
        sent_at: Instant,
        url: &str,
        method: &str,
        request_body: Option<String>,
        failure: TransportFailure,
    ) -> TestResultSample {
        let latency_ms = millis_since(sent_at, Instant::now());
        let assertions = evaluate_all(&self.config.assertions, latency_ms, None);

        tracing::trace!(index, status_text = failure.status_text, latency_ms, "request failed");

        TestResultSample {
            id: uuid::Uuid::new_v4().to_string(),
            request_index: index,
            timestamp_ms,
            latency_ms,
            success: false,
            status_code: 0,
            status_text: failure.status_text.to_string(),
            error: Some(failure.message),
            url: url.to_string(),
            method: method.to_string(),
            request_body,
            response_body: None,
            assertions,
            network_timings: None,
        }
    }
}

async fn perform(
    request: RequestBuilder,
    hard_stop: &StopSignal,
) -> Result<Exchange, TransportFailure> {
    let response = tokio::select! {
        biased;
        _ = hard_stop.tripped() => return Err(TransportFailure::aborted()),
        response = request.send() => response,
    };
    let response = response.map_err(|err| TransportFailure::from_reqwest(&err))?;
    let headers_at = Instant::now();
    let status = response.status();

    let bytes = tokio::select! {
        biased;
        _ = hard_stop.tripped() => return Err(TransportFailure::aborted()),
        bytes = response.bytes() => bytes,
    };
    let bytes = bytes.map_err(|err| TransportFailure::from_reqwest(&err))?;

    Ok(Exchange {
        status,
        body: String::from_utf8_lossy(&bytes).into_owned(),
        headers_at,
    })
}

fn millis_since(start: Instant, end: Instant) -> f64 {
    end.saturating_duration_since(start).as_secs_f64() * 1000.0
}

fn cap_body(mut body: String) -> String {
    if body.len() <= MAX_STORED_BODY_BYTES {
        return body;
    }
    let mut cut = MAX_STORED_BODY_BYTES;
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    body.truncate(cut);
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DataDrivenBody, DataReplayMode, RunMode};

    fn executor(config: LoadTestConfig) -> RequestExecutor {
        RequestExecutor::new(Arc::new(config)).expect("executor")
    }

    fn base_config() -> LoadTestConfig {
        LoadTestConfig::new(
            "http://127.0.0.1:9/items",
            1,
            RunMode::Iterations { iterations: 3 },
        )
    }

    #[test]
    fn strict_data_replay_exhausts_after_last_record() {
        let mut config = base_config();
        config.data_driven_body = Some(DataDrivenBody {
            records: vec!["{\"a\":1}".into()],
            mode: DataReplayMode::Strict,
        });
        let executor = executor(config);
        assert_eq!(executor.resolve_body(Some(0)).as_deref(), Some("{\"a\":1}"));
        assert_eq!(executor.resolve_body(Some(1)), None);
    }

    #[test]
    fn static_body_is_templated_before_id_injection() {
        let mut config = base_config();
        config.body = r#"{"id": 0, "name": "{{name}}"}"#.to_string();
        config.variables.insert("name".into(), "widget".into());
        config.id_injection.auto_increment = false;
        let executor = executor(config);

        let body = executor.resolve_body(Some(0)).expect("body");
        let json: serde_json::Value = serde_json::from_str(&body).expect("json body");
        assert_eq!(json["name"], "widget");
        assert_eq!(json["id"], 0);
    }

    #[test]
    fn body_without_index_is_not_mutated() {
        let mut config = base_config();
        config.body = r#"{"id": 0}"#.to_string();
        let executor = executor(config);
        assert_eq!(executor.resolve_body(None).as_deref(), Some(r#"{"id": 0}"#));
    }

    #[test]
    fn bare_bearer_auth_token_sends_no_authorization() {
        let mut config = base_config();
        config.auth_token = Some("Bearer".to_string());
        assert!(executor(config).bearer.is_none());
    }

    #[test]
    fn proxy_session_of_only_the_scheme_word_is_rejected() {
        let mut config = base_config();
        config.proxy = Some(ProxyRoute {
            endpoint: "http://127.0.0.1:9/proxy".to_string(),
            session_token: Some("Bearer ".to_string()),
        });
        assert!(matches!(
            RequestExecutor::new(Arc::new(config)),
            Err(LoadTestError::Config(ConfigError::MissingProxySession))
        ));
    }

    #[test]
    fn proxied_request_carries_the_envelope_and_session() {
        let mut config = base_config();
        config.proxy = Some(ProxyRoute {
            endpoint: "http://127.0.0.1:9/proxy".to_string(),
            session_token: Some("session-1".to_string()),
        });
        let executor = executor(config);
        let proxy = executor.config().proxy.clone().expect("proxy route");

        let request = executor
            .proxied_request(
                &proxy,
                "http://target.invalid/items",
                &Method::POST,
                &HeaderMap::new(),
                Some("{}"),
            )
            .expect("envelope encodes")
            .build()
            .expect("request builds");
        assert_eq!(request.url().as_str(), "http://127.0.0.1:9/proxy");
        assert_eq!(request.headers()[AUTHORIZATION], "Bearer session-1");
        let payload: serde_json::Value =
            serde_json::from_slice(request.body().and_then(|body| body.as_bytes()).unwrap())
                .unwrap();
        assert_eq!(payload["url"], "http://target.invalid/items");
        assert_eq!(payload["options"]["method"], "POST");
    }

    #[test]
    fn cap_body_respects_char_boundaries() {
        let body = "é".repeat(MAX_STORED_BODY_BYTES);
        let capped = cap_body(body);
        assert!(capped.len() <= MAX_STORED_BODY_BYTES);
        assert!(capped.chars().all(|c| c == 'é'));
        assert_eq!(cap_body("short".to_string()), "short");
    }

    #[tokio::test]
    async fn tripped_hard_stop_records_aborted_sample() {
        let executor = executor(base_config());
        let hard_stop = StopSignal::new();
        hard_stop.trip();

        let endpoint = executor.config().targets().remove(0);
        let sample = executor
            .execute(Some(0), &endpoint, &hard_stop)
            .await
            .into_sample()
            .expect("aborted attempt still produces a sample");
        assert!(!sample.success);
        assert_eq!(sample.status_code, 0);
        assert_eq!(sample.status_text, ABORTED_STATUS_TEXT);
        assert!(sample.error.unwrap().contains("deadline"));
    }
}
