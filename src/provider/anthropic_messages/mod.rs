//! Anthropic Messages API.

mod error;
mod provider;
mod request;
mod response;
mod stream;
mod types;

pub use provider::{DEFAULT_MAX_TOKENS, DEFAULT_MODEL, DEFAULT_VERSION, AnthropicMessagesProvider};
