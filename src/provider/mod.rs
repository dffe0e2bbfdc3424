//! Upstream adapters and the interface the chat service dispatches through.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::error::GatewayError;
use crate::types::{ChatRequest, ChatResponse, Message, ProviderKind, Role, StreamChunk};

pub mod anthropic_messages;
pub mod google_gemini;
pub mod ollama;
pub mod openai_chat;
pub(crate) mod retry;

pub use anthropic_messages::AnthropicMessagesProvider;
pub use google_gemini::GoogleGeminiProvider;
pub use ollama::OllamaProvider;
pub use openai_chat::OpenAiChatProvider;

/// Normalized chunk sequence.
///
/// Items are infallible: upstream failures arrive as the terminal chunk's `error`.
pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// Capability set every adapter implements.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Issues one non-streaming upstream call.
    async fn generate(&self, request: &ChatRequest) -> Result<ChatResponse, GatewayError>;

    /// Opens the upstream stream.
    ///
    /// Failures that happen before the first frame (rejected credential, bad status)
    /// are returned as `Err`; everything after that is folded into the terminal chunk.
    async fn generate_stream(&self, request: &ChatRequest) -> Result<ChunkStream, GatewayError>;

    fn kind(&self) -> ProviderKind;

    /// Short name used in error messages and log fields.
    fn name(&self) -> &'static str;
}

/// Closed set of adapters, one variant per [`ProviderKind`].
pub enum ProviderAdapter {
    OpenAi(OpenAiChatProvider),
    Anthropic(AnthropicMessagesProvider),
    Gemini(GoogleGeminiProvider),
    Ollama(OllamaProvider),
}

impl ProviderAdapter {
    fn inner(&self) -> &dyn LLMProvider {
        match self {
            ProviderAdapter::OpenAi(provider) => provider,
            ProviderAdapter::Anthropic(provider) => provider,
            ProviderAdapter::Gemini(provider) => provider,
            ProviderAdapter::Ollama(provider) => provider,
        }
    }
}

impl fmt::Debug for ProviderAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ProviderAdapter").field(&self.kind()).finish()
    }
}

#[async_trait]
impl LLMProvider for ProviderAdapter {
    async fn generate(&self, request: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        self.inner().generate(request).await
    }

    async fn generate_stream(&self, request: &ChatRequest) -> Result<ChunkStream, GatewayError> {
        self.inner().generate_stream(request).await
    }

    fn kind(&self) -> ProviderKind {
        self.inner().kind()
    }

    fn name(&self) -> &'static str {
        self.inner().name()
    }
}

impl From<OpenAiChatProvider> for ProviderAdapter {
    fn from(provider: OpenAiChatProvider) -> Self {
        ProviderAdapter::OpenAi(provider)
    }
}

impl From<AnthropicMessagesProvider> for ProviderAdapter {
    fn from(provider: AnthropicMessagesProvider) -> Self {
        ProviderAdapter::Anthropic(provider)
    }
}

impl From<GoogleGeminiProvider> for ProviderAdapter {
    fn from(provider: GoogleGeminiProvider) -> Self {
        ProviderAdapter::Gemini(provider)
    }
}

impl From<OllamaProvider> for ProviderAdapter {
    fn from(provider: OllamaProvider) -> Self {
        ProviderAdapter::Ollama(provider)
    }
}

/// Picks the request's model, falling back to the adapter default when unset or blank.
pub(crate) fn resolve_model(request: &ChatRequest, default_model: &str) -> String {
    request
        .model
        .as_deref()
        .map(str::trim)
        .filter(|model| !model.is_empty())
        .unwrap_or(default_model)
        .to_string()
}

/// Clamps a validated temperature into a provider range narrower than `[0, 2]`.
pub(crate) fn clamp_temperature(temperature: f32, max: f32) -> f32 {
    temperature.clamp(0.0, max)
}

/// Conversation reshaped for providers that take the system prompt out of band and
/// require alternating turns.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct FoldedConversation {
    pub(crate) system: Option<String>,
    pub(crate) turns: Vec<(Role, String)>,
}

/// Joins every system message into one prompt, maps tool results to user turns and
/// merges consecutive turns of the same author.
pub(crate) fn fold_conversation(messages: &[Message]) -> FoldedConversation {
    let mut system_parts = Vec::new();
    let mut turns: Vec<(Role, String)> = Vec::new();

    for message in messages {
        let role = match message.role {
            Role::System => {
                if !message.content.trim().is_empty() {
                    system_parts.push(message.content.as_str());
                }
                continue;
            }
            Role::Tool => Role::User,
            other => other,
        };
        match turns.last_mut() {
            Some((last_role, text)) if *last_role == role => {
                text.push_str("\n\n");
                text.push_str(&message.content);
            }
            _ => turns.push((role, message.content.clone())),
        }
    }

    FoldedConversation {
        system: (!system_parts.is_empty()).then(|| system_parts.join("\n\n")),
        turns,
    }
}

/// Truncates upstream error bodies before they are embedded in messages.
pub(crate) fn snippet(text: &str) -> String {
    const LIMIT: usize = 512;
    if text.chars().count() <= LIMIT {
        text.to_string()
    } else {
        let cut: String = text.chars().take(LIMIT).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_falls_back_to_default_when_blank() {
        let request = ChatRequest::new(vec![Message::user("hi")]);
        assert_eq!(resolve_model(&request, "gpt-4"), "gpt-4");

        let blank = request.clone().with_model("  ");
        assert_eq!(resolve_model(&blank, "gpt-4"), "gpt-4");

        let explicit = request.with_model("gpt-4o-mini");
        assert_eq!(resolve_model(&explicit, "gpt-4"), "gpt-4o-mini");
    }

    #[test]
    fn temperature_is_clamped_not_rejected() {
        assert_eq!(clamp_temperature(1.7, 1.0), 1.0);
        assert_eq!(clamp_temperature(0.3, 1.0), 0.3);
        assert_eq!(clamp_temperature(1.7, 2.0), 1.7);
    }

    #[test]
    fn fold_collects_system_and_merges_adjacent_turns() {
        let folded = fold_conversation(&[
            Message::system("Be brief."),
            Message::user("hello"),
            Message::system("Answer in English."),
            Message::tool("result"),
            Message::assistant("ok"),
        ]);
        assert_eq!(
            folded.system.as_deref(),
            Some("Be brief.\n\nAnswer in English.")
        );
        assert_eq!(
            folded.turns,
            vec![
                (Role::User, "hello\n\nresult".to_string()),
                (Role::Assistant, "ok".to_string()),
            ]
        );
    }

    #[test]
    fn snippet_truncates_long_bodies() {
        let long = "x".repeat(600);
        let cut = snippet(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), 515);
        assert_eq!(snippet("short"), "short");
    }
}
