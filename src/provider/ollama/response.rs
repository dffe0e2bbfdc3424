use crate::error::GatewayError;
use crate::types::{ChatResponse, FinishReason, Message, TokenUsage};

use super::error::stream_error;
use super::types::{OllamaChatResponse, OllamaMessage};

pub(crate) fn map_response(
    resp: OllamaChatResponse,
    requested_model: &str,
) -> Result<ChatResponse, GatewayError> {
    if let Some(error) = resp.error {
        return Err(stream_error(error));
    }
    let usage = convert_usage(&resp);
    let message = resp
        .message
        .unwrap_or_else(|| OllamaMessage::new("assistant", ""));
    let finish_reason = if message.tool_calls.is_empty() {
        convert_finish_reason(resp.done_reason.as_deref())
    } else {
        FinishReason::ToolCall
    };

    Ok(ChatResponse {
        message: Message::assistant(message.content),
        usage,
        model: resp.model.unwrap_or_else(|| requested_model.to_string()),
        finish_reason,
    })
}

pub(crate) fn convert_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("length") => FinishReason::Length,
        _ => FinishReason::Stop,
    }
}

pub(crate) fn convert_usage(resp: &OllamaChatResponse) -> Option<TokenUsage> {
    let usage = TokenUsage::from_counts(resp.prompt_eval_count, resp.eval_count, None);
    (!usage.is_empty()).then_some(usage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn parse(body: &str) -> OllamaChatResponse {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn maps_content_usage_and_done_reason() {
        let resp = parse(
            r#"{"model":"llama3.2","created_at":"2024-07-01T00:00:00Z",
                "message":{"role":"assistant","content":"Hello AI"},
                "done":true,"done_reason":"length","prompt_eval_count":12,"eval_count":5}"#,
        );
        let mapped = map_response(resp, "ignored").unwrap();
        assert_eq!(mapped.message.content, "Hello AI");
        assert_eq!(mapped.finish_reason, FinishReason::Length);
        assert_eq!(mapped.usage.unwrap().total_tokens, Some(17));
    }

    #[test]
    fn usage_is_none_when_counts_absent() {
        let resp = parse(r#"{"message":{"role":"assistant","content":"x"},"done":true}"#);
        let mapped = map_response(resp, "llama3.2").unwrap();
        assert!(mapped.usage.is_none());
        assert_eq!(mapped.model, "llama3.2");
        assert_eq!(mapped.finish_reason, FinishReason::Stop);
    }

    #[test]
    fn oversized_counts_keep_parts_without_total() {
        let resp = parse(
            r#"{"message":{"role":"assistant","content":"x"},"done":true,
                "prompt_eval_count":18446744073709551615,"eval_count":1}"#,
        );
        let usage = map_response(resp, "llama3.2").unwrap().usage.unwrap();
        assert_eq!(usage.prompt_tokens, Some(u64::MAX));
        assert_eq!(usage.total_tokens, None);
    }

    #[test]
    fn error_field_is_protocol_error() {
        let err = map_response(parse(r#"{"error":"unexpected EOF"}"#), "m").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamProtocol);
    }
}
