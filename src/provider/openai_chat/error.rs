use std::collections::HashMap;

use serde_json::Value;

use crate::error::{GatewayError, error_from_status, error_from_type};
use crate::provider::retry::{retry_after_from_headers, retry_after_from_payload};
use crate::provider::snippet;

use super::provider::PROVIDER_NAME;
use super::types::{OpenAiErrorBody, OpenAiErrorEnvelope};

fn describe(error: &OpenAiErrorBody) -> String {
    let message = error
        .message
        .clone()
        .unwrap_or_else(|| "unknown error".to_string());
    match &error.code {
        Some(Value::String(code)) => format!("{message} ({code})"),
        Some(Value::Number(code)) => format!("{message} ({code})"),
        _ => message,
    }
}

/// Maps a non-2xx response into the canonical taxonomy.
pub(crate) fn parse_openai_error(
    status: u16,
    headers: &HashMap<String, String>,
    body: &str,
) -> GatewayError {
    let retry_after = retry_after_from_headers(headers);
    let message = serde_json::from_str::<OpenAiErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error)
        .map(|error| describe(&error))
        .unwrap_or_else(|| snippet(body));
    error_from_status(PROVIDER_NAME, status, message, retry_after)
}

/// Classifies a `data: {"error": {...}}` frame received after the stream opened.
pub(crate) fn stream_error(error: &Value) -> GatewayError {
    let parsed: Option<OpenAiErrorBody> = serde_json::from_value(error.clone()).ok();
    let Some(parsed) = parsed else {
        return GatewayError::protocol(PROVIDER_NAME, format!("stream error: {error}"));
    };
    let hint = parsed.kind.clone().or_else(|| match &parsed.code {
        Some(Value::String(code)) => Some(code.clone()),
        _ => None,
    });
    error_from_type(
        PROVIDER_NAME,
        hint.as_deref(),
        describe(&parsed),
        retry_after_from_payload(error),
    )
}
