use crate::error::GatewayError;
use crate::types::{ChatResponse, FinishReason, Message, TokenUsage};

use super::provider::PROVIDER_NAME;
use super::types::{GeminiCandidate, GeminiResponse, GeminiUsage};

pub(crate) fn map_response(
    resp: GeminiResponse,
    requested_model: &str,
) -> Result<ChatResponse, GatewayError> {
    let usage = resp.usage_metadata.map(convert_usage);
    let model = resp
        .model_version
        .unwrap_or_else(|| requested_model.to_string());
    let candidate = resp
        .candidates
        .and_then(|candidates| candidates.into_iter().next())
        .ok_or_else(|| no_candidates(resp.prompt_feedback.and_then(|f| f.block_reason)))?;

    let finish_reason = candidate
        .finish_reason
        .as_deref()
        .map(convert_finish_reason)
        .unwrap_or(FinishReason::Stop);
    Ok(ChatResponse {
        message: Message::assistant(candidate_text(candidate)),
        usage,
        model,
        finish_reason,
    })
}

/// Concatenates the answer text of one candidate, skipping thought parts.
pub(crate) fn candidate_text(candidate: GeminiCandidate) -> String {
    candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter(|part| part.thought != Some(true))
                .filter_map(|part| part.text)
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn no_candidates(block_reason: Option<String>) -> GatewayError {
    match block_reason {
        Some(reason) => GatewayError::protocol(
            PROVIDER_NAME,
            format!("prompt was blocked: {reason}"),
        ),
        None => GatewayError::protocol(PROVIDER_NAME, "response has no candidates"),
    }
}

pub(crate) fn convert_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "MAX_TOKENS" => FinishReason::Length,
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII"
        | "IMAGE_SAFETY" => FinishReason::Error,
        "MALFORMED_FUNCTION_CALL" => FinishReason::ToolCall,
        _ => FinishReason::Stop,
    }
}

pub(crate) fn convert_usage(usage: GeminiUsage) -> TokenUsage {
    TokenUsage::from_counts(
        usage.prompt_token_count,
        usage.candidates_token_count,
        usage.total_token_count,
    )
}
