//! OpenAI-compatible engine adapter.
//!
//! Implements the `colloquy_core::Engine` capability contract against a
//! `/chat/completions` HTTP endpoint, mapping the conversation data model
//! to the wire format and HTTP failures to `EngineError`.

mod api;
mod client;
mod config;

pub use client::OpenAiEngine;
pub use config::OpenAiConfig;
