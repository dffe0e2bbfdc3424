use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

/// Canonical failure taxonomy of the gateway core.
///
/// Every adapter maps its upstream failures into exactly one of these variants before
/// returning, so no transport- or vendor-specific error type crosses the
/// [`crate::client::ChatService`] boundary.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A malformed canonical request reached the core, or the upstream refused its parameters.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
    /// No adapter or credential is registered for the requested provider.
    #[error("unknown provider {provider}: {message}")]
    UnknownProvider { provider: String, message: String },
    /// The upstream rejected the configured credential.
    #[error("{provider} rejected the credential: {message}")]
    Auth {
        provider: &'static str,
        message: String,
    },
    /// The upstream throttled the request.
    #[error("{provider} rate limited the request: {message}")]
    RateLimit {
        provider: &'static str,
        message: String,
        /// Wait suggested by the upstream before retrying.
        retry_after: Option<Duration>,
    },
    /// No response arrived within the configured budget.
    #[error("upstream timed out: {message}")]
    Timeout { message: String },
    /// The upstream response did not have the expected shape.
    #[error("{provider} protocol error: {message}")]
    Protocol {
        provider: &'static str,
        message: String,
    },
    /// The search collaborator failed during a tool round.
    #[error("tool {tool} failed: {message}")]
    ToolExecution { tool: String, message: String },
    /// Any failure reported by the search collaborator.
    #[error("search unavailable: {message}")]
    SearchUnavailable { message: String },
}

/// Serializable tag identifying a [`GatewayError`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "invalid_request_error")]
    InvalidRequest,
    #[serde(rename = "unknown_provider_error")]
    UnknownProvider,
    #[serde(rename = "upstream_auth_error")]
    UpstreamAuth,
    #[serde(rename = "upstream_rate_limit_error")]
    UpstreamRateLimit,
    #[serde(rename = "upstream_timeout_error")]
    UpstreamTimeout,
    #[serde(rename = "upstream_protocol_error")]
    UpstreamProtocol,
    #[serde(rename = "tool_execution_error")]
    ToolExecution,
    #[serde(rename = "search_unavailable_error")]
    SearchUnavailable,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request_error",
            ErrorKind::UnknownProvider => "unknown_provider_error",
            ErrorKind::UpstreamAuth => "upstream_auth_error",
            ErrorKind::UpstreamRateLimit => "upstream_rate_limit_error",
            ErrorKind::UpstreamTimeout => "upstream_timeout_error",
            ErrorKind::UpstreamProtocol => "upstream_protocol_error",
            ErrorKind::ToolExecution => "tool_execution_error",
            ErrorKind::SearchUnavailable => "search_unavailable_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl GatewayError {
    /// Creates a [`GatewayError::InvalidRequest`] from a textual description.
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_gateway::error::{ErrorKind, GatewayError};
    ///
    /// let err = GatewayError::invalid_request("messages must not be empty");
    /// assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    /// ```
    pub fn invalid_request<T: Into<String>>(message: T) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a [`GatewayError::Protocol`] with the given provider name and message.
    pub fn protocol<T: Into<String>>(provider: &'static str, message: T) -> Self {
        Self::Protocol {
            provider,
            message: message.into(),
        }
    }

    /// Creates a [`GatewayError::Timeout`].
    pub fn timeout<T: Into<String>>(message: T) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            GatewayError::UnknownProvider { .. } => ErrorKind::UnknownProvider,
            GatewayError::Auth { .. } => ErrorKind::UpstreamAuth,
            GatewayError::RateLimit { .. } => ErrorKind::UpstreamRateLimit,
            GatewayError::Timeout { .. } => ErrorKind::UpstreamTimeout,
            GatewayError::Protocol { .. } => ErrorKind::UpstreamProtocol,
            GatewayError::ToolExecution { .. } => ErrorKind::ToolExecution,
            GatewayError::SearchUnavailable { .. } => ErrorKind::SearchUnavailable,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GatewayError::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Whether a caller may reasonably retry. The core itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::RateLimit { .. } | GatewayError::Timeout { .. }
        )
    }

    /// HTTP status the transport collaborator should use for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::InvalidRequest { .. } | GatewayError::UnknownProvider { .. } => 400,
            GatewayError::Auth { .. } | GatewayError::Protocol { .. } => 502,
            GatewayError::RateLimit { .. } => 429,
            GatewayError::Timeout { .. } => 504,
            GatewayError::ToolExecution { .. } => 500,
            GatewayError::SearchUnavailable { .. } => 503,
        }
    }

    /// Structured error body returned by the buffered endpoint.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use llm_gateway::error::GatewayError;
    ///
    /// let err = GatewayError::RateLimit {
    ///     provider: "openai",
    ///     message: "quota".into(),
    ///     retry_after: Some(Duration::from_secs(3)),
    /// };
    /// let body = err.to_body();
    /// assert_eq!(body["error"]["kind"], "upstream_rate_limit_error");
    /// assert_eq!(body["error"]["retry_after"], 3);
    /// ```
    pub fn to_body(&self) -> Value {
        let mut error = json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        if let Some(wait) = self.retry_after() {
            error["retry_after"] = Value::from(wait.as_secs());
        }
        json!({ "error": error })
    }
}

/// Classifies a non-2xx upstream HTTP status into the canonical taxonomy.
pub(crate) fn error_from_status(
    provider: &'static str,
    status: u16,
    message: String,
    retry_after: Option<Duration>,
) -> GatewayError {
    match status {
        401 | 403 => GatewayError::Auth { provider, message },
        429 => GatewayError::RateLimit {
            provider,
            message,
            retry_after,
        },
        408 | 504 => GatewayError::Timeout {
            message: format!("{provider}: {message}"),
        },
        400 | 404 | 422 => GatewayError::InvalidRequest {
            message: format!("{provider} refused the request: {message}"),
        },
        _ => GatewayError::Protocol {
            provider,
            message: format!("status {status}: {message}"),
        },
    }
}

/// Classifies an error reported inside a stream, where no HTTP status is available.
pub(crate) fn error_from_type(
    provider: &'static str,
    error_type: Option<&str>,
    message: String,
    retry_after: Option<Duration>,
) -> GatewayError {
    let hint = error_type.unwrap_or_default().to_ascii_lowercase();
    if hint.contains("auth") || hint.contains("permission") || hint.contains("api_key") {
        GatewayError::Auth { provider, message }
    } else if hint.contains("rate_limit")
        || hint.contains("overloaded")
        || hint.contains("resource_exhausted")
        || hint.contains("quota")
    {
        GatewayError::RateLimit {
            provider,
            message,
            retry_after,
        }
    } else if hint.contains("deadline") || hint.contains("timeout") {
        GatewayError::Timeout {
            message: format!("{provider}: {message}"),
        }
    } else if hint.contains("invalid_request")
        || hint.contains("invalid_argument")
        || hint.contains("not_found")
    {
        GatewayError::InvalidRequest {
            message: format!("{provider} refused the request: {message}"),
        }
    } else {
        GatewayError::Protocol { provider, message }
    }
}
