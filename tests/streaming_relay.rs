//! Integration tests for streaming chat completions
//!
//! Covers verbatim SSE relay from a real HTTP upstream, failover before the
//! first event, mid-stream failure after commit and caller cancellation.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use bytes::Bytes;
use futures::{StreamExt, stream};
use modelgate::{
    config::Config,
    handlers::{self, AppState},
    models::Endpoint,
    upstream::{ByteStream, ForwardError, Upstream},
};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SSE_BODY: &str = concat!(
    "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\n\n",
    "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"}}]}\n\n",
    "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"}}]}\n\n",
    "data: [DONE]\n\n",
);

fn stream_request(model: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "model": model,
                "stream": true,
                "messages": [{"role": "user", "content": "hi"}]
            })
            .to_string(),
        ))
        .unwrap()
}

fn two_endpoint_config(first_url: &str, second_url: &str) -> Config {
    Config::from_toml_str(&format!(
        r#"
[server]

[gateway]
failure_threshold = 100
stream_idle_timeout_seconds = 5

[[endpoints]]
name = "first"
base_url = "{first_url}"
models = ["m"]

[[endpoints]]
name = "second"
base_url = "{second_url}"
models = ["m"]
"#
    ))
    .expect("test config should be valid")
}

fn single_endpoint_config() -> Config {
    Config::from_toml_str(
        r#"
[server]

[gateway]
stream_idle_timeout_seconds = 5

[[endpoints]]
name = "flaky"
base_url = "http://flaky.invalid/v1"
models = ["m"]
"#,
    )
    .expect("test config should be valid")
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Upstream whose stream is produced by a closure per call
struct FakeStreamUpstream {
    make: Box<dyn Fn(&str) -> Result<ByteStream, ForwardError> + Send + Sync>,
    calls: Mutex<Vec<String>>,
}

impl FakeStreamUpstream {
    fn new(
        make: impl Fn(&str) -> Result<ByteStream, ForwardError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            make: Box::new(make),
            calls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Upstream for FakeStreamUpstream {
    async fn forward_buffered(
        &self,
        _endpoint: &Endpoint,
        _body: &Value,
        _timeout: Duration,
    ) -> Result<Value, ForwardError> {
        Err(ForwardError::Connection("buffered calls not scripted".to_string()))
    }

    async fn open_stream(
        &self,
        endpoint: &Endpoint,
        _body: &Value,
        _timeout: Duration,
    ) -> Result<ByteStream, ForwardError> {
        self.calls.lock().unwrap().push(endpoint.name().to_string());
        (self.make)(endpoint.name())
    }
}

fn chunks(items: Vec<Result<&'static str, ForwardError>>) -> ByteStream {
    Box::pin(stream::iter(
        items.into_iter().map(|item| item.map(|s| Bytes::from_static(s.as_bytes()))),
    ))
}

// -------------------------------------------------------------------------
// Real HTTP upstream
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_sse_events_are_relayed_verbatim() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"stream": true, "model": "m"})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(SSE_BODY, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/v1", server.uri());
    let config = Config::from_toml_str(&format!(
        "[server]\n[[endpoints]]\nname = \"sse\"\nbase_url = \"{url}\"\nmodels = [\"m\"]\n"
    ))
    .unwrap();
    let app = handlers::router(AppState::new(Arc::new(config)).unwrap());

    let response = app.oneshot(stream_request("m")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
    assert_eq!(response.headers().get("cache-control").unwrap(), "no-cache");
    assert_eq!(body_string(response).await, SSE_BODY);
}

#[tokio::test]
async fn test_stream_fails_over_before_first_event() {
    let broken = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&broken)
        .await;
    let good = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(SSE_BODY, "text/event-stream"))
        .mount(&good)
        .await;

    let config = two_endpoint_config(
        &format!("{}/v1", broken.uri()),
        &format!("{}/v1", good.uri()),
    );
    let app = handlers::router(AppState::new(Arc::new(config)).unwrap());

    for _ in 0..4 {
        let response = app.clone().oneshot(stream_request("m")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, SSE_BODY);
    }
}

#[tokio::test]
async fn test_stream_client_error_is_relayed_without_retry() {
    let upstream_body = r#"{"error":{"message":"stream_options requires stream","type":"invalid_request_error"}}"#;
    let mut servers = Vec::new();
    for _ in 0..2 {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400).set_body_raw(upstream_body, "application/json"),
            )
            .mount(&server)
            .await;
        servers.push(server);
    }
    let config = two_endpoint_config(
        &format!("{}/v1", servers[0].uri()),
        &format!("{}/v1", servers[1].uri()),
    );
    let state = AppState::new(Arc::new(config)).unwrap();
    let app = handlers::router(state.clone());

    let response = app.oneshot(stream_request("m")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/json"
    );
    assert_eq!(body_string(response).await, upstream_body);

    let mut total = 0;
    for server in &servers {
        total += server.received_requests().await.unwrap().len();
    }
    assert_eq!(total, 1, "a 4xx must not be retried on another endpoint");

    let snapshot = state.gateway().health().snapshot().await;
    assert!(snapshot.iter().all(|h| h.consecutive_failures() == 0));
}

// -------------------------------------------------------------------------
// Scripted upstreams
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_upstream_closing_before_first_event_is_retried() {
    let upstream = FakeStreamUpstream::new(|name| match name {
        "first" => Ok(chunks(vec![])),
        _ => Ok(chunks(vec![Ok("data: {\"n\":1}\n\n"), Ok("data: [DONE]\n\n")])),
    });
    let config = two_endpoint_config("http://first.invalid/v1", "http://second.invalid/v1");
    let state = AppState::with_upstream(Arc::new(config), upstream.clone()).unwrap();
    let app = handlers::router(state);

    for _ in 0..4 {
        let response = app.clone().oneshot(stream_request("m")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_string(response).await,
            "data: {\"n\":1}\n\ndata: [DONE]\n\n"
        );
    }
    let calls = upstream.calls.lock().unwrap().clone();
    assert_eq!(calls.iter().filter(|c| *c == "second").count(), 4);
}

#[tokio::test]
async fn test_mid_stream_failure_ends_with_error_event() {
    // Five chunks planned, the connection drops after the second
    let upstream = FakeStreamUpstream::new(|_| {
        Ok(chunks(vec![
            Ok("data: {\"n\":1}\n\n"),
            Ok("data: {\"n\":2}\n\n"),
            Err(ForwardError::Connection("connection reset by peer".to_string())),
            Ok("data: {\"n\":3}\n\n"),
            Ok("data: [DONE]\n\n"),
        ]))
    });
    let state =
        AppState::with_upstream(Arc::new(single_endpoint_config()), upstream.clone()).unwrap();
    let app = handlers::router(state.clone());

    let response = app.oneshot(stream_request("m")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;

    assert!(body.starts_with("data: {\"n\":1}\n\ndata: {\"n\":2}\n\nevent: error\n"));
    assert!(body.contains("partial_stream_failure"));
    assert!(body.contains("connection reset by peer"));
    assert!(!body.contains("{\"n\":3}"));
    assert!(!body.contains("[DONE]"));

    // Committed streams are never retried
    assert_eq!(upstream.calls.lock().unwrap().len(), 1);

    let health = state.gateway().health().snapshot().await;
    assert_eq!(health[0].consecutive_failures(), 1);
    let metrics = state.metrics().gather().unwrap();
    assert!(metrics.contains("modelgate_mid_stream_failures_total{endpoint=\"flaky\"} 1"));
}

#[tokio::test]
async fn test_upstream_eof_without_done_is_partial_failure() {
    let upstream =
        FakeStreamUpstream::new(|_| Ok(chunks(vec![Ok(": ping\n\n"), Ok("data: {\"n\":1}\n\n")])));
    let state = AppState::with_upstream(Arc::new(single_endpoint_config()), upstream).unwrap();
    let app = handlers::router(state);

    let response = app.oneshot(stream_request("m")).await.unwrap();
    let body = body_string(response).await;
    assert!(body.starts_with(": ping\n\ndata: {\"n\":1}\n\nevent: error\n"));
    assert!(body.contains("before [DONE]"));
}

#[tokio::test]
async fn test_caller_disconnect_cancels_upstream() {
    let (dropped_tx, dropped_rx) = oneshot::channel::<()>();
    let dropped_tx = Arc::new(Mutex::new(Some(dropped_tx)));

    let upstream = FakeStreamUpstream::new(move |_| {
        let guard = dropped_tx.lock().unwrap().take();
        let events = stream::iter(vec![Ok::<_, ForwardError>(Bytes::from_static(
            b"data: {\"n\":1}\n\n",
        ))])
            .chain(stream::pending())
            .map(move |item| {
                // Keeps the sender alive for as long as the upstream stream lives
                let _held = &guard;
                item
            });
        Ok(Box::pin(events) as ByteStream)
    });
    let state = AppState::with_upstream(Arc::new(single_endpoint_config()), upstream).unwrap();
    let app = handlers::router(state.clone());

    let response = app.oneshot(stream_request("m")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut frames = response.into_body().into_data_stream();
    let first = frames.next().await.unwrap().unwrap();
    assert_eq!(&first[..], b"data: {\"n\":1}\n\n");
    drop(frames);

    let closed = tokio::time::timeout(Duration::from_secs(2), dropped_rx).await;
    assert!(
        matches!(closed, Ok(Err(_))),
        "upstream stream should be dropped after the caller goes away"
    );

    // Caller cancellation says nothing about the endpoint
    let health = state.gateway().health().snapshot().await;
    assert_eq!(health[0].consecutive_failures(), 0);
}
