//! chat-relay: streaming relay for chat completions.
//!
//! Accepts OpenAI-style chat-completion POSTs, forwards them to a configured
//! upstream API with a server-side credential, and pipes the upstream SSE
//! stream back to the caller, re-serializing each event:
//!
//!   Client → relay handler → upstream API → relay handler → Client
//!
//! The relay holds no state across requests; the only shared values are the
//! configuration and the upstream credential, both loaded once at startup.

pub mod config;
pub mod server;
pub mod upstream;
