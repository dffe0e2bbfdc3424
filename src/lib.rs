//! Provider abstraction and streaming core of a unified LLM chat gateway.
//!
//! [`ChatService`] dispatches canonical [`ChatRequest`]s to OpenAI, Anthropic, Gemini or
//! Ollama and returns either a buffered [`ChatResponse`] or a [`ChunkStream`] of
//! normalized chunks. [`multiplex`] renders any such stream in one OpenAI-compatible
//! SSE shape.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod multiplex;
pub mod provider;
pub mod search;
pub mod stream;
pub mod types;

pub use client::{ChatService, ChatServiceBuilder};
pub use config::{GatewayConfig, build_service};
pub use error::{ErrorKind, GatewayError};
pub use provider::{ChunkStream, LLMProvider, ProviderAdapter};
pub use types::*;
