use std::collections::HashMap;
use std::time::Duration;

use crate::error::{GatewayError, error_from_status, error_from_type};
use crate::provider::retry::retry_after_from_headers;
use crate::provider::snippet;

use super::provider::PROVIDER_NAME;
use super::types::{AnthropicErrorBody, AnthropicErrorEnvelope};

/// `529 overloaded_error` is Anthropic's way of throttling.
const STATUS_OVERLOADED: u16 = 529;

/// Parses the `{"type":"error","error":{...}}` body of a non-2xx response.
pub(crate) fn parse_anthropic_error(
    status: u16,
    headers: &HashMap<String, String>,
    body: &str,
) -> GatewayError {
    let retry_after = retry_after_from_headers(headers);
    let error = serde_json::from_str::<AnthropicErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error);
    let Some(error) = error else {
        return error_from_status(PROVIDER_NAME, status, snippet(body), retry_after);
    };

    let message = error
        .message
        .clone()
        .unwrap_or_else(|| "unknown error".to_string());
    if status == STATUS_OVERLOADED {
        return GatewayError::RateLimit {
            provider: PROVIDER_NAME,
            message,
            retry_after,
        };
    }
    match error_from_status(PROVIDER_NAME, status, message, retry_after) {
        GatewayError::Protocol { .. } => stream_error(&error, retry_after),
        classified => classified,
    }
}

/// Classifies an `error` event or an unrecognized status by the vendor error type.
pub(crate) fn stream_error(error: &AnthropicErrorBody, retry_after: Option<Duration>) -> GatewayError {
    let message = error
        .message
        .clone()
        .unwrap_or_else(|| "unknown error".to_string());
    error_from_type(PROVIDER_NAME, error.kind.as_deref(), message, retry_after)
}
