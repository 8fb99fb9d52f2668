//! Integration tests for weighted endpoint selection
//!
//! Validates that traffic follows configured weights and that a fully
//! suspended pool still serves requests.

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use modelgate::{
    config::Config,
    handlers::{self, AppState},
    models::Endpoint,
    upstream::{ByteStream, ForwardError, Upstream},
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

/// Upstream that answers from memory and counts calls per endpoint
#[derive(Default)]
struct CountingUpstream {
    fail_all: bool,
    calls: Mutex<HashMap<String, usize>>,
}

impl CountingUpstream {
    fn count(&self, name: &str) -> usize {
        self.calls.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    fn total(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl Upstream for CountingUpstream {
    async fn forward_buffered(
        &self,
        endpoint: &Endpoint,
        _body: &Value,
        _timeout: Duration,
    ) -> Result<Value, ForwardError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(endpoint.name().to_string())
            .or_default() += 1;
        if self.fail_all {
            return Err(ForwardError::Connection("connection refused".to_string()));
        }
        Ok(json!({"id": "chatcmpl", "served_by": endpoint.name()}))
    }

    async fn open_stream(
        &self,
        _endpoint: &Endpoint,
        _body: &Value,
        _timeout: Duration,
    ) -> Result<ByteStream, ForwardError> {
        Err(ForwardError::Connection("streams not scripted".to_string()))
    }
}

fn create_app(toml: &str, upstream: Arc<CountingUpstream>) -> (Router, AppState) {
    let config = Config::from_toml_str(toml).expect("test config should be valid");
    let state = AppState::with_upstream(Arc::new(config), upstream).expect("state");
    (handlers::router(state.clone()), state)
}

fn chat(model: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"model": model, "messages": [{"role": "user", "content": "hi"}]}).to_string(),
        ))
        .unwrap()
}

const WEIGHTED_CONFIG: &str = r#"
[server]

[[endpoints]]
name = "heavy"
base_url = "http://heavy.invalid/v1"
weight = 3
models = ["m"]

[[endpoints]]
name = "light"
base_url = "http://light.invalid/v1"
weight = 1
models = ["m"]
"#;

#[tokio::test]
async fn test_traffic_follows_weights() {
    let upstream = Arc::new(CountingUpstream::default());
    let (app, _) = create_app(WEIGHTED_CONFIG, Arc::clone(&upstream));

    const REQUESTS: usize = 1000;
    for _ in 0..REQUESTS {
        let response = app.clone().oneshot(chat("m")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let heavy = upstream.count("heavy");
    let light = upstream.count("light");
    assert_eq!(heavy + light, REQUESTS);

    // 3:1 weights -> 75% / 25%, allow ±5 percentage points
    let heavy_share = heavy as f64 / REQUESTS as f64;
    assert!(
        (0.70..=0.80).contains(&heavy_share),
        "heavy endpoint got {heavy} of {REQUESTS} requests ({:.1}%)",
        heavy_share * 100.0
    );
}

#[tokio::test]
async fn test_only_endpoints_serving_the_model_are_selected() {
    let upstream = Arc::new(CountingUpstream::default());
    let (app, _) = create_app(
        r#"
[server]

[[endpoints]]
name = "llama-host"
base_url = "http://llama.invalid/v1"
weight = 10
models = ["llama"]

[[endpoints]]
name = "qwen-host"
base_url = "http://qwen.invalid/v1"
models = ["qwen"]
"#,
        Arc::clone(&upstream),
    );

    for _ in 0..50 {
        let response = app.clone().oneshot(chat("qwen")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(upstream.count("qwen-host"), 50);
    assert_eq!(upstream.count("llama-host"), 0);
}

#[tokio::test]
async fn test_fully_suspended_pool_still_gets_attempts() {
    let upstream = Arc::new(CountingUpstream {
        fail_all: true,
        ..Default::default()
    });
    let (app, state) = create_app(
        &format!("{WEIGHTED_CONFIG}\n[gateway]\nfailure_threshold = 1\n"),
        Arc::clone(&upstream),
    );

    // First request trips both endpoints into suspension
    let response = app.clone().oneshot(chat("m")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(upstream.total(), 2);
    let snapshot = state.gateway().health().snapshot().await;
    assert!(snapshot.iter().all(|h| h.suspended_until().is_some()));

    // With everyone suspended the full set is tried rather than refusing
    let response = app.oneshot(chat("m")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(upstream.total(), 4);
}
