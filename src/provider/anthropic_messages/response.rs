use crate::error::GatewayError;
use crate::types::{ChatResponse, FinishReason, Message, TokenUsage};

use super::provider::PROVIDER_NAME;
use super::types::{AnthropicResponse, AnthropicUsage};

pub(crate) fn map_response(
    resp: AnthropicResponse,
    requested_model: &str,
) -> Result<ChatResponse, GatewayError> {
    let blocks = resp
        .content
        .ok_or_else(|| GatewayError::protocol(PROVIDER_NAME, "response has no content field"))?;
    let text: String = blocks
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect();

    Ok(ChatResponse {
        message: Message::assistant(text),
        usage: resp.usage.map(convert_usage),
        model: resp.model.unwrap_or_else(|| requested_model.to_string()),
        finish_reason: resp
            .stop_reason
            .as_deref()
            .map(convert_finish_reason)
            .unwrap_or(FinishReason::Stop),
    })
}

pub(crate) fn convert_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolCall,
        "refusal" => FinishReason::Error,
        // end_turn, stop_sequence, pause_turn
        _ => FinishReason::Stop,
    }
}

pub(crate) fn convert_usage(usage: AnthropicUsage) -> TokenUsage {
    TokenUsage::from_counts(usage.input_tokens, usage.output_tokens, None)
}
