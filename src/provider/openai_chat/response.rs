use crate::error::GatewayError;
use crate::types::{ChatResponse, FinishReason, Message, TokenUsage};

use super::provider::PROVIDER_NAME;
use super::types::{OpenAiChatResponse, OpenAiMessageContent, OpenAiUsage};

pub(crate) fn map_response(
    resp: OpenAiChatResponse,
    requested_model: &str,
) -> Result<ChatResponse, GatewayError> {
    let choice = resp
        .choices
        .ok_or_else(|| GatewayError::protocol(PROVIDER_NAME, "response has no choices field"))?
        .into_iter()
        .next()
        .ok_or_else(|| GatewayError::protocol(PROVIDER_NAME, "response has an empty choices array"))?;

    let content = match choice.message.and_then(|message| message.content) {
        None => String::new(),
        Some(OpenAiMessageContent::Text(text)) => text,
        Some(OpenAiMessageContent::Parts(parts)) => parts
            .into_iter()
            .filter(|part| part.kind.as_deref().is_none_or(|kind| kind == "text"))
            .filter_map(|part| part.text)
            .collect(),
    };

    Ok(ChatResponse {
        message: Message::assistant(content),
        usage: resp.usage.map(convert_usage),
        model: resp.model.unwrap_or_else(|| requested_model.to_string()),
        finish_reason: choice
            .finish_reason
            .as_deref()
            .map(convert_finish_reason)
            .unwrap_or(FinishReason::Stop),
    })
}

pub(crate) fn convert_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "length" => FinishReason::Length,
        "tool_calls" | "function_call" => FinishReason::ToolCall,
        "content_filter" => FinishReason::Error,
        _ => FinishReason::Stop,
    }
}

pub(crate) fn convert_usage(usage: OpenAiUsage) -> TokenUsage {
    TokenUsage::from_counts(
        usage.prompt_tokens,
        usage.completion_tokens,
        usage.total_tokens,
    )
}
