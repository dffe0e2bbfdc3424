use std::collections::HashMap;
use std::time::Duration;

use crate::error::{GatewayError, error_from_status, error_from_type};
use crate::provider::retry::retry_after_from_headers;
use crate::provider::snippet;

use super::provider::PROVIDER_NAME;
use super::types::{GeminiErrorBody, GeminiErrorEnvelope};

fn describe(error: &GeminiErrorBody) -> String {
    let message = error
        .message
        .clone()
        .unwrap_or_else(|| "unknown error".to_string());
    match error.status.as_deref() {
        Some(status) if !status.is_empty() => format!("{message} ({status})"),
        _ => message,
    }
}

/// Reads `retryDelay` (for example `"32s"`) from a `google.rpc.RetryInfo` detail.
fn retry_delay(error: &GeminiErrorBody) -> Option<Duration> {
    error
        .details
        .iter()
        .filter_map(|detail| detail.get("retryDelay")?.as_str())
        .find_map(|delay| {
            let seconds: f64 = delay.trim().trim_end_matches('s').parse().ok()?;
            (seconds.is_finite() && seconds >= 0.0).then(|| Duration::from_secs(seconds.ceil() as u64))
        })
}

/// Parses a Google RPC error body returned with a non-2xx status.
pub(crate) fn parse_gemini_error(
    status: u16,
    headers: &HashMap<String, String>,
    body: &str,
) -> GatewayError {
    let error = serde_json::from_str::<GeminiErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error);
    match error {
        Some(error) => {
            let retry_after = retry_after_from_headers(headers).or_else(|| retry_delay(&error));
            match error_from_status(PROVIDER_NAME, status, describe(&error), retry_after) {
                GatewayError::Protocol { .. } => stream_error(&error),
                classified => classified,
            }
        }
        None => error_from_status(
            PROVIDER_NAME,
            status,
            snippet(body),
            retry_after_from_headers(headers),
        ),
    }
}

/// Classifies an error object by its RPC status name.
pub(crate) fn stream_error(error: &GeminiErrorBody) -> GatewayError {
    error_from_type(
        PROVIDER_NAME,
        error.status.as_deref(),
        describe(error),
        retry_delay(error),
    )
}
