use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{GatewayError, error_from_status};
use crate::provider::retry::retry_after_from_headers;
use crate::provider::snippet;

use super::provider::PROVIDER_NAME;

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Ollama reports failures as `{"error": "..."}`.
pub(crate) fn parse_ollama_error(
    status: u16,
    headers: &HashMap<String, String>,
    body: &str,
) -> GatewayError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.error)
        .unwrap_or_else(|| snippet(body));
    error_from_status(PROVIDER_NAME, status, message, retry_after_from_headers(headers))
}

/// An `error` line in the middle of an NDJSON stream.
pub(crate) fn stream_error(message: String) -> GatewayError {
    GatewayError::protocol(PROVIDER_NAME, message)
}
