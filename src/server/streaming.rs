//! SSE (Server-Sent Events) relay streaming.
//!
//! Scans the raw upstream byte stream for `data:`-framed event lines and
//! re-emits each decoded event to the client in the same framing. The copy
//! runs in a spawned task feeding a channel-backed response body, so the
//! handler returns as soon as the stream is established.

use axum::body::Body;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// Line prefix framing an SSE data payload.
pub const DATA_PREFIX: &str = "data:";

/// Upstream end-of-stream marker. Dropped rather than forwarded; the relay
/// terminates on upstream connection close, not on the sentinel.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Error carried to the outbound body when the relay aborts mid-stream.
#[derive(Debug, Error)]
pub enum RelayStreamError {
    #[error("Upstream read failed: {0}")]
    UpstreamRead(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Incremental scanner for `data:`-framed SSE lines.
///
/// Raw bytes accumulate until a newline completes a line, so a multi-byte
/// UTF-8 sequence split across reads stays buffered until its line terminator
/// arrives. Complete lines are trimmed, the data prefix stripped, the
/// `[DONE]` sentinel dropped, and the remainder parsed as JSON. Lines that
/// fail to parse are logged and dropped without ending the stream.
#[derive(Debug, Default)]
pub struct SseLineScanner {
    buf: Vec<u8>,
}

impl SseLineScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of upstream bytes, returning the events completed by it
    /// in arrival order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();

            let text = match std::str::from_utf8(&line) {
                Ok(t) => t.trim(),
                Err(e) => {
                    warn!(error = %e, "Dropping non-UTF-8 SSE line");
                    continue;
                }
            };

            // Blank separators, comments, and non-data fields are framing only.
            let Some(data) = text.strip_prefix(DATA_PREFIX) else {
                continue;
            };
            let data = data.trim_start();

            if data == DONE_SENTINEL {
                continue;
            }

            match serde_json::from_str::<Value>(data) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!(error = %e, line = data, "Dropping malformed SSE data line");
                }
            }
        }
        events
    }
}

/// Re-encode an event in SSE framing.
fn encode_event(event: &Value) -> Bytes {
    let json = serde_json::to_string(event).unwrap_or_default();
    Bytes::from(format!("{DATA_PREFIX} {json}\n\n"))
}

/// Spawn the background copy task and return the channel-backed response body.
///
/// The task reads the upstream stream to completion, forwarding each decoded
/// event downstream. Upstream EOF closes the body cleanly; an upstream read
/// error aborts it with [`RelayStreamError`]; a failed send means the client
/// is gone and stops the copy without further writes.
pub fn relay_sse_body<S, E>(upstream: S, request_id: String) -> Body
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let (tx, rx) = mpsc::channel::<Result<Bytes, RelayStreamError>>(32);

    tokio::spawn(async move {
        let mut upstream = std::pin::pin!(upstream);
        let mut scanner = SseLineScanner::new();
        let mut forwarded: u64 = 0;

        while let Some(chunk) = upstream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    warn!(request_id = %request_id, error = %e, "Upstream read failed, aborting relay");
                    let _ = tx
                        .send(Err(RelayStreamError::UpstreamRead(Box::new(e))))
                        .await;
                    return;
                }
            };

            for event in scanner.push(&chunk) {
                if tx.send(Ok(encode_event(&event))).await.is_err() {
                    debug!(request_id = %request_id, forwarded, "Client disconnected, stopping relay");
                    return;
                }
                forwarded += 1;
            }
        }

        debug!(request_id = %request_id, forwarded, "Upstream stream ended");
        // tx drops here, closing the outbound stream cleanly.
    });

    Body::from_stream(ReceiverStream::new(rx))
}
