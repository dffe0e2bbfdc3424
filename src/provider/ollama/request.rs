use serde_json::Value;

use crate::provider::clamp_temperature;
use crate::types::Message;

use super::types::{OllamaChatBody, OllamaMessage, OllamaOptions};

const MAX_TEMPERATURE: f32 = 2.0;

/// Ollama understands all four canonical roles natively.
pub(crate) fn convert_messages(messages: &[Message]) -> Vec<OllamaMessage> {
    messages
        .iter()
        .map(|message| OllamaMessage::new(message.role.as_str(), message.content.clone()))
        .collect()
}

pub(crate) fn build_ollama_body<'a>(
    model: &'a str,
    messages: &'a [OllamaMessage],
    temperature: f32,
    max_tokens: Option<u32>,
    stream: bool,
    tools: Option<Vec<Value>>,
) -> OllamaChatBody<'a> {
    OllamaChatBody {
        model,
        messages,
        stream,
        options: OllamaOptions {
            temperature: clamp_temperature(temperature, MAX_TEMPERATURE),
            num_predict: max_tokens,
        },
        tools,
    }
}
