use crate::domain::{HeaderEntry, TransportConfig};
use crate::engine::template::interpolate;
use crate::error::{ConfigError, LoadTestError};
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONNECTION, CONTENT_TYPE,
};
use reqwest::{Client, Method, Proxy};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

pub fn build_client(transport: &TransportConfig) -> Result<Client, LoadTestError> {
    let mut builder = Client::builder();
    builder = if transport.follow_redirects {
        builder.redirect(reqwest::redirect::Policy::limited(10))
    } else {
        builder.redirect(reqwest::redirect::Policy::none())
    };

    if let Some(timeout_ms) = transport.timeout_ms.filter(|ms| *ms > 0) {
        builder = builder.timeout(Duration::from_millis(timeout_ms));
    }

    if let Some(proxy_url) = transport
        .proxy_url
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        let proxy = Proxy::all(proxy_url).map_err(LoadTestError::Client)?;
        builder = builder.proxy(proxy);
    }

    if !transport.verify_ssl {
        builder = builder.danger_accept_invalid_certs(true);
    }

    if !transport.keep_alive {
        builder = builder.pool_max_idle_per_host(0);
    }

    builder.build().map_err(LoadTestError::Client)
}

/// Enabled custom headers with `{{var}}` placeholders resolved in their values.
pub fn build_headers(
    entries: &[HeaderEntry],
    variables: &HashMap<String, String>,
    keep_alive: bool,
) -> Result<HeaderMap, ConfigError> {
    let mut headers = HeaderMap::new();

    for entry in entries.iter().filter(|entry| entry.enabled) {
        if entry.key.is_empty() {
            continue;
        }

        let header_name =
            HeaderName::from_bytes(entry.key.as_bytes()).map_err(|err| ConfigError::InvalidHeader {
                key: entry.key.clone(),
                reason: err.to_string(),
            })?;
        let header_value = HeaderValue::from_str(&interpolate(&entry.value, variables))
            .map_err(|err| ConfigError::InvalidHeader {
                key: entry.key.clone(),
                reason: err.to_string(),
            })?;
        headers.insert(header_name, header_value);
    }

    if !keep_alive {
        headers.insert(CONNECTION, HeaderValue::from_static("close"));
    }

    Ok(headers)
}

/// `Authorization` value for a token, `None` when the token is blank or only
/// the `Bearer` scheme word.
pub fn bearer_header(token: &str) -> Result<Option<HeaderValue>, ConfigError> {
    let token = token.trim();
    let credential = match token.split_once(char::is_whitespace) {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        None if token.eq_ignore_ascii_case("bearer") => "",
        _ => token,
    };
    if credential.is_empty() {
        return Ok(None);
    }
    HeaderValue::from_str(&format!("Bearer {credential}"))
        .map(Some)
        .map_err(|err| ConfigError::InvalidHeader {
            key: AUTHORIZATION.to_string(),
            reason: err.to_string(),
        })
}

/// Final header set for one request. Later steps override earlier ones:
/// custom headers, then the JSON content type, then the bearer token.
pub fn request_headers(
    base: &HeaderMap,
    method: &Method,
    has_body: bool,
    bearer: Option<&HeaderValue>,
) -> HeaderMap {
    let mut headers = base.clone();
    if has_body && matches!(*method, Method::POST | Method::PUT | Method::PATCH) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    if let Some(bearer) = bearer {
        headers.insert(AUTHORIZATION, bearer.clone());
    }
    headers
}

pub fn should_send_body(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

#[derive(Debug, Serialize)]
pub struct ProxyEnvelope<'a> {
    pub url: &'a str,
    pub options: ProxyOptions<'a>,
}

#[derive(Debug, Serialize)]
pub struct ProxyOptions<'a> {
    pub method: &'a str,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<&'a str>,
}

pub fn proxy_envelope<'a>(
    url: &'a str,
    method: &'a Method,
    headers: &HeaderMap,
    body: Option<&'a str>,
) -> ProxyEnvelope<'a> {
    let headers = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();

    ProxyEnvelope {
        url,
        options: ProxyOptions {
            method: method.as_str(),
            headers,
            body,
        },
    }
}
