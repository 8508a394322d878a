//! Relay HTTP API.
//!
//! A single operation: POST a chat-completion body on any path, get the
//! upstream SSE stream relayed back. Validation failures (method, credential,
//! body, upstream status) respond synchronously; once streaming has begun,
//! failures can only terminate the stream.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{Config, API_KEY_ENV};
use crate::server::streaming::relay_sse_body;
use crate::upstream::client::UpstreamClient;

/// Cap on inbound request body size.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Application state shared across handlers.
pub struct AppState {
    pub upstream: UpstreamClient,
    pub config: Arc<Config>,
    /// Upstream credential, loaded once at startup. `None` rejects with 401.
    pub api_key: Option<String>,
}

/// Build the axum router. Every path routes to the relay handler.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", any(relay_handler))
        .route("/{*path}", any(relay_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

// ─── Request/Payload Types ─────────────────────────────────────────────────

/// Chat completion request (OpenAI-compatible).
///
/// Only the fields the relay acts on are typed; everything else rides along
/// in `extra` and is forwarded verbatim.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Payload forwarded upstream: computed fields overlaid on the passthrough map.
#[derive(Debug, Serialize)]
pub struct UpstreamPayload {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Construct the outbound payload: default the model when absent or empty,
/// force streaming on, and pass everything else through.
pub fn build_payload(request: ChatCompletionRequest, default_model: &str) -> UpstreamPayload {
    let ChatCompletionRequest {
        model,
        messages,
        mut extra,
    } = request;

    // The computed stream flag wins over any inbound value.
    extra.remove("stream");

    let model = model
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| default_model.to_string());

    UpstreamPayload {
        model,
        messages,
        stream: true,
        extra,
    }
}

// ─── Route Handler ─────────────────────────────────────────────────────────

/// The relay handler.
///
/// Validates method, credential, and body, forwards the payload upstream,
/// then hands the response body over to the background SSE copy task.
async fn relay_handler(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let request_id = Uuid::new_v4().to_string();

    // 1. Method check, before any other work.
    if request.method() != Method::POST {
        return (StatusCode::METHOD_NOT_ALLOWED, "method not allowed").into_response();
    }

    // 2. Credential check. Missing configuration, not a client mistake.
    let api_key = match state.api_key.as_deref() {
        Some(key) if !key.is_empty() => key.to_string(),
        _ => {
            error!(
                request_id = %request_id,
                "{API_KEY_ENV} is not configured, rejecting request"
            );
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    };

    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    // 3. Body parsing.
    let body = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(request_id = %request_id, error = %e, "Failed to read request body");
            return (StatusCode::BAD_REQUEST, "bad request").into_response();
        }
    };

    let chat_request: ChatCompletionRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            warn!(request_id = %request_id, error = %e, "Invalid JSON body");
            return (StatusCode::BAD_REQUEST, "bad request").into_response();
        }
    };

    // 4. Payload construction.
    let payload = build_payload(chat_request, &state.config.upstream.default_model);

    info!(
        request_id = %request_id,
        model = %payload.model,
        messages = payload.messages.len(),
        "Relaying chat completion"
    );

    // 5. Upstream call.
    let upstream_response = match state
        .upstream
        .chat_completions(&payload, &api_key, origin.as_deref())
        .await
    {
        Ok(r) => r,
        Err(e) => {
            error!(request_id = %request_id, error = %e, "Upstream call failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response();
        }
    };

    // 6. Upstream failure: propagate status and error text, no retry.
    let status = upstream_response.status();
    if !status.is_success() {
        let text = upstream_response.text().await.unwrap_or_else(|e| {
            warn!(request_id = %request_id, error = %e, "Failed to read upstream error body");
            String::new()
        });
        error!(
            request_id = %request_id,
            status = %status,
            body = %text,
            "Upstream returned an error"
        );
        return (status, text).into_response();
    }

    // 7. Streaming relay: respond immediately, copy in the background.
    let body = relay_sse_body(upstream_response.bytes_stream(), request_id);

    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}
