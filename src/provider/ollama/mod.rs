//! Ollama `/api/chat`, including the `web_search` tool round.

mod error;
mod provider;
mod request;
mod response;
mod stream;
mod tools;
mod types;

pub use provider::{DEFAULT_BASE_URL, DEFAULT_MAX_TOOL_ROUNDS, DEFAULT_MODEL, OllamaProvider};
