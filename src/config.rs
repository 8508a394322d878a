//! Runtime configuration for chat-relay.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! The upstream credential is deliberately kept out of the config file: it is
//! read once from the environment at startup and injected into the handler
//! state. Its absence is a per-request condition (401), not a startup failure.

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Name of the environment variable holding the upstream credential.
pub const API_KEY_ENV: &str = "RELAY_API_KEY";

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "chat-relay", about = "Streaming chat-completion relay")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen address.
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub listen: String,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Upstream API configuration.
    pub upstream: UpstreamConfig,
}

/// Upstream chat-completion API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Chat-completions endpoint URL.
    pub endpoint: String,

    /// Model substituted when a request omits one.
    pub default_model: String,

    /// HTTP-Referer value used when the inbound request carries no Origin header.
    pub referer_fallback: String,

    /// X-Title header identifying this relay to the upstream.
    pub client_label: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            default_model: "openai/gpt-4o-mini".to_string(),
            referer_fallback: "http://localhost:8080".to_string(),
            client_label: "chat-relay".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }
}

/// Read the upstream credential from the environment.
///
/// An empty value is treated the same as an unset variable.
pub fn api_key_from_env() -> Option<String> {
    std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty())
}
