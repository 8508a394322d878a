//! HTTP client for the upstream chat-completion API.
//!
//! Owns a pooled `reqwest::Client` built once at startup together with the
//! outbound header policy: bearer credential, referer (inbound Origin or the
//! configured fallback), and the client label.

use serde::Serialize;
use thiserror::Error;

use crate::config::UpstreamConfig;

/// Errors from the upstream call path.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Client for the upstream chat-completion endpoint.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    config: UpstreamConfig,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// POST a chat-completion payload to the configured endpoint.
    ///
    /// `origin` is the inbound request's Origin header; it is forwarded as
    /// HTTP-Referer, falling back to the configured placeholder. The returned
    /// response may carry any status; the caller decides how to relay it.
    pub async fn chat_completions<T: Serialize>(
        &self,
        payload: &T,
        api_key: &str,
        origin: Option<&str>,
    ) -> Result<reqwest::Response, UpstreamError> {
        let referer = origin.unwrap_or(&self.config.referer_fallback);

        let response = self
            .http
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .header("HTTP-Referer", referer)
            .header("X-Title", &self.config.client_label)
            .json(payload)
            .send()
            .await?;

        Ok(response)
    }
}
