//! Upstream chat-completion API access.

pub mod client;
