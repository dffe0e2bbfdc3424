//! Canonical data structures shared by every provider adapter.
//!
//! These types define the provider-agnostic request/response contract. Adapters translate
//! them into each upstream wire format and back, so the rest of the crate never sees a
//! vendor payload.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, GatewayError};

/// Maximum number of messages accepted in a single request.
pub const MAX_MESSAGES: usize = 50;
/// Maximum length, in characters, of a system message.
pub const MAX_SYSTEM_CHARS: usize = 5_000;
/// Maximum length, in characters, of a user, assistant or tool message.
pub const MAX_TURN_CHARS: usize = 10_000;
/// Temperature applied when the caller does not provide one.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    /// Returns the lowercase wire name shared by OpenAI-style APIs.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// One conversation turn. Position within [`ChatRequest::messages`] is the turn order.
///
/// # Examples
///
/// ```
/// use llm_gateway::types::{Message, Role};
///
/// let msg = Message::user("hi");
/// assert_eq!(msg.role, Role::User);
/// assert_eq!(msg.content, "hi");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content)
    }
}

/// Closed set of upstream backends the gateway can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "gemini")]
    Gemini,
    #[serde(rename = "ollama")]
    Ollama,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Gemini,
        ProviderKind::Ollama,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Ollama => "ollama",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = GatewayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        ProviderKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| GatewayError::UnknownProvider {
                provider: value.to_string(),
                message: "expected one of openai, anthropic, gemini, ollama".to_string(),
            })
    }
}

/// Provider-agnostic chat request.
///
/// The transport layer validates and deserializes this shape before it reaches the core;
/// [`ChatRequest::validate`] only re-checks the invariants the core relies on.
///
/// # Examples
///
/// ```
/// use llm_gateway::types::{ChatRequest, Message, ProviderKind};
///
/// let request = ChatRequest::new(vec![Message::system("Be brief."), Message::user("hi")])
///     .with_provider(ProviderKind::Ollama)
///     .with_max_tokens(128);
/// assert_eq!(request.temperature, 0.7);
/// assert!(request.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<ProviderKind>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub tools_enabled: bool,
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            model: None,
            provider: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: None,
            stream: false,
            tools_enabled: false,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_tools(mut self, enabled: bool) -> Self {
        self.tools_enabled = enabled;
        self
    }

    /// Re-checks the structural invariants, reporting the first violation as
    /// [`GatewayError::InvalidRequest`].
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.messages.is_empty() {
            return Err(GatewayError::invalid_request("messages must not be empty"));
        }
        if self.messages.len() > MAX_MESSAGES {
            return Err(GatewayError::invalid_request(format!(
                "at most {MAX_MESSAGES} messages are allowed, got {}",
                self.messages.len()
            )));
        }
        if !self.temperature.is_finite() || !(0.0..=2.0).contains(&self.temperature) {
            return Err(GatewayError::invalid_request(format!(
                "temperature must be within [0, 2], got {}",
                self.temperature
            )));
        }
        if self.max_tokens == Some(0) {
            return Err(GatewayError::invalid_request(
                "max_tokens must be a positive integer",
            ));
        }
        for (index, message) in self.messages.iter().enumerate() {
            let limit = match message.role {
                Role::System => MAX_SYSTEM_CHARS,
                _ => MAX_TURN_CHARS,
            };
            let length = message.content.chars().count();
            if length > limit {
                return Err(GatewayError::invalid_request(format!(
                    "message {index} ({}) has {length} characters, limit is {limit}",
                    message.role.as_str()
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCall,
    Error,
}

/// Token accounting reported by the upstream provider.
///
/// Providers that do not report one of the counts leave it as `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

impl TokenUsage {
    /// Builds usage from raw counts, deriving the total only when the provider omitted it
    /// and both parts are known. A sum that does not fit in `u64` leaves the total unset.
    pub fn from_counts(prompt: Option<u64>, completion: Option<u64>, total: Option<u64>) -> Self {
        let total = total.or_else(|| match (prompt, completion) {
            (Some(prompt), Some(completion)) => prompt.checked_add(completion),
            _ => None,
        });
        Self {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: total,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.prompt_tokens.is_none() && self.completion_tokens.is_none() && self.total_tokens.is_none()
    }
}

/// Buffered generation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message: Message,
    pub usage: Option<TokenUsage>,
    pub model: String,
    pub finish_reason: FinishReason,
}

/// Error details carried by a terminal [`StreamChunk`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
    /// Suggested wait in seconds, set for rate-limit errors when the upstream supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl From<&GatewayError> for ErrorPayload {
    fn from(err: &GatewayError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            retry_after: err.retry_after().map(|wait| wait.as_secs()),
        }
    }
}

/// Normalized incremental output.
///
/// A stream is zero or more delta chunks followed by exactly one terminal chunk carrying
/// either `finish_reason` or `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub delta: Option<String>,
    pub finish_reason: Option<FinishReason>,
    pub error: Option<ErrorPayload>,
}

impl StreamChunk {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            delta: Some(text.into()),
            finish_reason: None,
            error: None,
        }
    }

    pub fn finish(reason: FinishReason) -> Self {
        Self {
            delta: None,
            finish_reason: Some(reason),
            error: None,
        }
    }

    pub fn failure(err: &GatewayError) -> Self {
        Self {
            delta: None,
            finish_reason: None,
            error: Some(ErrorPayload::from(err)),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.finish_reason.is_some() || self.error.is_some()
    }
}
