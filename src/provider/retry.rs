use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;

/// Extracts the `Retry-After` header (in seconds) if present.
///
/// Vendors use the numeric form for throttling responses; HTTP-date values are ignored.
pub(crate) fn retry_after_from_headers(headers: &HashMap<String, String>) -> Option<Duration> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
        .and_then(|(_, value)| parse_seconds(value))
}

/// Reads a `retry_after` hint embedded in an in-stream error payload.
///
/// Accepts integer or fractional seconds, either as numbers or numeric strings.
pub(crate) fn retry_after_from_payload(payload: &Value) -> Option<Duration> {
    let hint = payload
        .get("retry_after")
        .or_else(|| payload.get("retryAfter"))?;
    match hint {
        Value::Number(number) => number.as_f64().and_then(seconds_to_duration),
        Value::String(text) => parse_seconds(text),
        _ => None,
    }
}

fn parse_seconds(value: &str) -> Option<Duration> {
    value.trim().parse::<f64>().ok().and_then(seconds_to_duration)
}

fn seconds_to_duration(seconds: f64) -> Option<Duration> {
    (seconds.is_finite() && seconds >= 0.0).then(|| Duration::from_secs(seconds.ceil() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let headers = HashMap::from([("Retry-After".to_string(), " 30 ".to_string())]);
        assert_eq!(retry_after_from_headers(&headers), Some(Duration::from_secs(30)));

        let dated = HashMap::from([(
            "retry-after".to_string(),
            "Wed, 21 Oct 2015 07:28:00 GMT".to_string(),
        )]);
        assert_eq!(retry_after_from_headers(&dated), None);
    }

    #[test]
    fn payload_hint_accepts_numbers_and_strings() {
        assert_eq!(
            retry_after_from_payload(&json!({"retry_after": 1.2})),
            Some(Duration::from_secs(2))
        );
        assert_eq!(
            retry_after_from_payload(&json!({"retryAfter": "7"})),
            Some(Duration::from_secs(7))
        );
        assert_eq!(retry_after_from_payload(&json!({"retry_after": -1})), None);
        assert_eq!(retry_after_from_payload(&json!({})), None);
    }
}
