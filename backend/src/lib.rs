//! HTTP backend wiring the streaming core to the Anthropic harness.

pub mod config;
pub mod http;
pub mod limiter;
pub mod logger;
pub mod prompt;
