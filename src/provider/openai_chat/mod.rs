//! OpenAI Chat Completions and compatible endpoints.

mod error;
mod provider;
mod request;
mod response;
mod stream;
mod types;

pub use provider::{DEFAULT_MODEL, OpenAiChatProvider};
