//! HTTP server: relay API and SSE stream handling.

pub mod relay_api;
pub mod streaming;
