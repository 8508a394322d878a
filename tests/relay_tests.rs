//! Integration tests for the full relay pipeline.
//!
//! Each test drives a real bound relay server over HTTP against a mock
//! upstream that records the calls it receives.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Json, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router;
use serde_json::{json, Value};

use chat_relay::config::Config;
use chat_relay::server::relay_api::{build_router, AppState};
use chat_relay::upstream::client::UpstreamClient;

/// What the mock upstream observed.
#[derive(Clone, Default)]
struct Recorded {
    hits: Arc<AtomicUsize>,
    last_body: Arc<Mutex<Option<Value>>>,
}

impl Recorded {
    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    fn last_body(&self) -> Value {
        self.last_body.lock().unwrap().clone().expect("no body recorded")
    }
}

/// Spawn a mock upstream returning a fixed response, recording every call.
async fn spawn_mock_upstream(
    status: StatusCode,
    content_type: &'static str,
    body: &'static str,
) -> (SocketAddr, Recorded) {
    let recorded = Recorded::default();

    async fn handler(
        State((recorded, status, content_type, body)): State<(
            Recorded,
            StatusCode,
            &'static str,
            &'static str,
        )>,
        Json(request): Json<Value>,
    ) -> impl IntoResponse {
        recorded.hits.fetch_add(1, Ordering::SeqCst);
        *recorded.last_body.lock().unwrap() = Some(request);
        (status, [(header::CONTENT_TYPE, content_type)], body)
    }

    let app = Router::new()
        .route("/", post(handler))
        .with_state((recorded.clone(), status, content_type, body));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, recorded)
}

/// Spawn the relay pointed at the given upstream, returning its address.
async fn spawn_relay(upstream_addr: SocketAddr, api_key: Option<&str>) -> SocketAddr {
    let mut config = Config::default();
    config.upstream.endpoint = format!("http://{upstream_addr}/");
    let config = Arc::new(config);

    let state = Arc::new(AppState {
        upstream: UpstreamClient::new(config.upstream.clone()),
        config,
        api_key: api_key.map(str::to_string),
    });

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

const SSE_BODY: &str = "data: {\"id\":1}\n\ndata: [DONE]\n\ndata: {\"id\":2}\n\n";

fn chat_body() -> Value {
    json!({"messages": [{"role": "user", "content": "hi"}]})
}

/// Parse a relayed SSE body back into its event payloads.
fn parse_events(body: &str) -> Vec<Value> {
    body.split("\n\n")
        .filter(|frame| !frame.is_empty())
        .map(|frame| {
            let data = frame.strip_prefix("data: ").expect("unexpected SSE framing");
            serde_json::from_str(data).expect("unparsable relayed event")
        })
        .collect()
}

#[tokio::test]
async fn test_non_post_is_rejected_without_upstream_call() {
    let (upstream, recorded) =
        spawn_mock_upstream(StatusCode::OK, "text/event-stream", SSE_BODY).await;
    let relay = spawn_relay(upstream, Some("sk-test")).await;

    let response = reqwest::get(format!("http://{relay}/")).await.unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(recorded.hits(), 0);
}

#[tokio::test]
async fn test_missing_credential_is_rejected_without_upstream_call() {
    let (upstream, recorded) =
        spawn_mock_upstream(StatusCode::OK, "text/event-stream", SSE_BODY).await;
    let relay = spawn_relay(upstream, None).await;

    let response = reqwest::Client::new()
        .post(format!("http://{relay}/"))
        .json(&chat_body())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(recorded.hits(), 0);
}

#[tokio::test]
async fn test_malformed_json_is_rejected_without_upstream_call() {
    let (upstream, recorded) =
        spawn_mock_upstream(StatusCode::OK, "text/event-stream", SSE_BODY).await;
    let relay = spawn_relay(upstream, Some("sk-test")).await;

    let response = reqwest::Client::new()
        .post(format!("http://{relay}/"))
        .header(header::CONTENT_TYPE, "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(recorded.hits(), 0);
}

#[tokio::test]
async fn test_upstream_error_status_and_body_are_propagated() {
    let (upstream, recorded) =
        spawn_mock_upstream(StatusCode::TOO_MANY_REQUESTS, "text/plain", "rate limited").await;
    let relay = spawn_relay(upstream, Some("sk-test")).await;

    let response = reqwest::Client::new()
        .post(format!("http://{relay}/"))
        .json(&chat_body())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.text().await.unwrap().contains("rate limited"));
    assert_eq!(recorded.hits(), 1);
}

#[tokio::test]
async fn test_sse_events_are_relayed_and_sentinel_dropped() {
    let (upstream, _recorded) =
        spawn_mock_upstream(StatusCode::OK, "text/event-stream", SSE_BODY).await;
    let relay = spawn_relay(upstream, Some("sk-test")).await;

    let response = reqwest::Client::new()
        .post(format!("http://{relay}/"))
        .json(&chat_body())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");

    let events = parse_events(&response.text().await.unwrap());
    assert_eq!(events, vec![json!({"id": 1}), json!({"id": 2})]);
}

#[tokio::test]
async fn test_malformed_sse_line_is_dropped_order_preserved() {
    let (upstream, _recorded) = spawn_mock_upstream(
        StatusCode::OK,
        "text/event-stream",
        "data: {\"id\":1}\n\ndata: not-json\n\ndata: {\"id\":2}\n\n",
    )
    .await;
    let relay = spawn_relay(upstream, Some("sk-test")).await;

    let response = reqwest::Client::new()
        .post(format!("http://{relay}/"))
        .json(&chat_body())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let events = parse_events(&response.text().await.unwrap());
    assert_eq!(events, vec![json!({"id": 1}), json!({"id": 2})]);
}

#[tokio::test]
async fn test_forwarded_payload_defaults_model_and_forces_stream() {
    let (upstream, recorded) =
        spawn_mock_upstream(StatusCode::OK, "text/event-stream", SSE_BODY).await;
    let relay = spawn_relay(upstream, Some("sk-test")).await;

    reqwest::Client::new()
        .post(format!("http://{relay}/"))
        .json(&json!({
            "stream": false,
            "temperature": 0.2,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .send()
        .await
        .unwrap();

    let forwarded = recorded.last_body();
    assert_eq!(forwarded["model"], json!("openai/gpt-4o-mini"));
    assert_eq!(forwarded["stream"], json!(true));
    assert_eq!(forwarded["temperature"], json!(0.2));
}

#[tokio::test]
async fn test_forwarded_payload_keeps_explicit_model() {
    let (upstream, recorded) =
        spawn_mock_upstream(StatusCode::OK, "text/event-stream", SSE_BODY).await;
    let relay = spawn_relay(upstream, Some("sk-test")).await;

    reqwest::Client::new()
        .post(format!("http://{relay}/"))
        .json(&json!({
            "model": "x",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(recorded.last_body()["model"], json!("x"));
}
