#![allow(dead_code)]

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use getman_loadtest::{LoadTestConfig, RunMode};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const PROXY_SESSION: &str = "session-1";

#[derive(Clone, Default)]
struct Hits(Arc<AtomicUsize>);

/// In-process target: fixed-latency, failing, hanging, echo, metrics and proxy routes.
pub struct TargetServer {
    pub base_url: String,
    hits: Hits,
}

impl TargetServer {
    pub async fn start() -> Self {
        let hits = Hits::default();
        let app = Router::new()
            .route("/ok", get(ok))
            .route("/slow", get(slow))
            .route("/fail", get(fail))
            .route("/hang", get(hang))
            .route("/echo", post(echo))
            .route("/metrics", get(metrics))
            .route("/proxy", post(proxy))
            .with_state(hits.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind target server");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve target");
        });

        Self {
            base_url: format!("http://{addr}"),
            hits,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub fn hits(&self) -> usize {
        self.hits.0.load(Ordering::SeqCst)
    }

    pub fn iterations(&self, path: &str, users: u32, iterations: u64) -> LoadTestConfig {
        LoadTestConfig::new(self.url(path), users, RunMode::Iterations { iterations })
    }

    pub fn duration(&self, path: &str, users: u32, duration_secs: u64) -> LoadTestConfig {
        LoadTestConfig::new(self.url(path), users, RunMode::Duration { duration_secs })
    }
}

async fn ok(State(hits): State<Hits>) -> &'static str {
    hits.0.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(10)).await;
    "ok"
}

async fn slow(State(hits): State<Hits>) -> Json<Value> {
    hits.0.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(150)).await;
    Json(json!({"status": "ok"}))
}

async fn fail(State(hits): State<Hits>) -> (StatusCode, &'static str) {
    hits.0.fetch_add(1, Ordering::SeqCst);
    (StatusCode::INTERNAL_SERVER_ERROR, "boom")
}

async fn hang(State(hits): State<Hits>) -> &'static str {
    hits.0.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(30)).await;
    "late"
}

async fn echo(State(hits): State<Hits>, body: String) -> String {
    hits.0.fetch_add(1, Ordering::SeqCst);
    body
}

async fn metrics() -> Json<Value> {
    Json(json!({"cpu": 12.5, "memory": 40.0}))
}

async fn proxy(
    State(hits): State<Hits>,
    headers: HeaderMap,
    Json(envelope): Json<Value>,
) -> (StatusCode, Json<Value>) {
    hits.0.fetch_add(1, Ordering::SeqCst);
    let authorized = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == format!("Bearer {PROXY_SESSION}"));
    if !authorized {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "no session"})));
    }
    (
        StatusCode::OK,
        Json(json!({
            "proxiedUrl": envelope["url"],
            "method": envelope["options"]["method"],
            "body": envelope["options"]["body"],
        })),
    )
}
