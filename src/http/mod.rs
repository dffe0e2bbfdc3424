use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;
use serde::Serialize;

use crate::error::GatewayError;

/// Minimal JSON POST request shared across adapters.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// Whole-request deadline. Streaming requests leave this unset.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Builds a POST request with a JSON request body.
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_gateway::http::HttpRequest;
    ///
    /// let request = HttpRequest::post_json("https://example.com", br"{}".to_vec());
    /// assert_eq!(request.headers.get("Content-Type"), Some(&"application/json".to_string()));
    /// assert!(request.timeout.is_none());
    /// ```
    pub fn post_json(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::from([("Content-Type".to_string(), "application/json".to_string())]),
            body,
            timeout: None,
        }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Decodes the JSON body, mainly for inspecting recorded requests.
    pub fn json_body(&self) -> Result<serde_json::Value, GatewayError> {
        serde_json::from_slice(&self.body)
            .map_err(|err| GatewayError::invalid_request(format!("request body is not JSON: {err}")))
    }
}

/// Fully buffered HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self, provider: &'static str) -> Result<String, GatewayError> {
        String::from_utf8(self.body.clone())
            .map_err(|err| GatewayError::protocol(provider, format!("response is not UTF-8: {err}")))
    }
}

/// HTTP response that carries a streaming body.
///
/// Dropping the body releases the underlying connection.
pub struct HttpStreamResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: HttpBodyStream,
}

impl HttpStreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Alias for the body stream returned by [`HttpTransport::send_stream`].
pub type HttpBodyStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, GatewayError>> + Send>>;

/// Transport abstraction that decouples adapters from the concrete HTTP client.
///
/// Implementations map connection-level failures into [`GatewayError`] so that no
/// client-library error type reaches the adapters.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends a request and resolves when the full response is available.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, GatewayError>;

    /// Sends a request and resolves as soon as the response head arrives.
    ///
    /// # Examples
    ///
    /// ```
    /// # use async_trait::async_trait;
    /// # use llm_gateway::http::{HttpTransport, HttpRequest, HttpResponse, HttpStreamResponse};
    /// # use llm_gateway::error::GatewayError;
    /// # use futures_util::{stream, StreamExt};
    /// struct EchoTransport;
    ///
    /// #[async_trait]
    /// impl HttpTransport for EchoTransport {
    ///     async fn send(&self, request: HttpRequest) -> Result<HttpResponse, GatewayError> {
    ///         Ok(HttpResponse { status: 200, headers: request.headers, body: request.body })
    ///     }
    ///     async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, GatewayError> {
    ///         let body = request.body;
    ///         let stream = stream::once(async move { Ok(body) });
    ///         Ok(HttpStreamResponse { status: 200, headers: request.headers, body: Box::pin(stream) })
    ///     }
    /// }
    ///
    /// # tokio::runtime::Runtime::new().unwrap().block_on(async {
    /// let response = EchoTransport
    ///     .send_stream(HttpRequest::post_json("https://example.com", br"{}".to_vec()))
    ///     .await
    ///     .unwrap();
    /// let chunks: Vec<_> = response.body.collect::<Vec<_>>().await;
    /// assert_eq!(chunks.len(), 1);
    /// # });
    /// ```
    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, GatewayError>;
}

/// Thread-safe handle to a transport implementation.
pub type DynHttpTransport = Arc<dyn HttpTransport>;

fn serialize_body<T: Serialize>(body: &T) -> Result<Vec<u8>, GatewayError> {
    serde_json::to_vec(body)
        .map_err(|err| GatewayError::invalid_request(format!("failed to serialize request: {err}")))
}

/// Serializes a body to JSON, attaches headers, and issues a buffered POST request.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] if serialization fails or forwards the error
/// raised by [`HttpTransport::send`].
pub async fn post_json_with_headers<T: Serialize>(
    transport: &dyn HttpTransport,
    url: impl Into<String>,
    headers: HashMap<String, String>,
    body: &T,
    timeout: Option<Duration>,
) -> Result<HttpResponse, GatewayError> {
    let request = HttpRequest::post_json(url, serialize_body(body)?)
        .with_headers(headers)
        .with_timeout(timeout);
    transport.send(request).await
}

/// Issues a JSON POST request and returns the streaming response.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] when serialization fails or propagates any
/// error from [`HttpTransport::send_stream`].
pub async fn post_json_stream_with_headers<T: Serialize>(
    transport: &dyn HttpTransport,
    url: impl Into<String>,
    headers: HashMap<String, String>,
    body: &T,
) -> Result<HttpStreamResponse, GatewayError> {
    let request = HttpRequest::post_json(url, serialize_body(body)?).with_headers(headers);
    transport.send_stream(request).await
}

/// Drains a streaming body, used to read the error payload of a failed stream request.
pub(crate) async fn collect_stream_text(
    mut body: HttpBodyStream,
    provider: &'static str,
) -> Result<String, GatewayError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = body.next().await {
        bytes.extend_from_slice(&chunk?);
    }
    String::from_utf8(bytes).map_err(|err| {
        GatewayError::protocol(provider, format!("failed to decode stream error body: {err}"))
    })
}

pub mod reqwest;

#[cfg(test)]
mod tests {
    use super::*;
    use serde::ser;

    /// Transport that panics if `send` or `send_stream` are invoked.
    struct PanicTransport;

    #[async_trait]
    impl HttpTransport for PanicTransport {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, GatewayError> {
            panic!("send should not be called");
        }

        async fn send_stream(&self, _request: HttpRequest) -> Result<HttpStreamResponse, GatewayError> {
            panic!("send_stream should not be called");
        }
    }

    struct NonSerializableBody;

    impl Serialize for NonSerializableBody {
        fn serialize<S>(&self, _serializer: S) -> Result<S::Ok, S::Error>
        where
            S: serde::Serializer,
        {
            Err(ser::Error::custom("intentional serialization failure for test"))
        }
    }

    #[tokio::test]
    async fn post_json_with_headers_returns_invalid_request_on_serde_error() {
        let result = post_json_with_headers(
            &PanicTransport,
            "http://example.com",
            HashMap::new(),
            &NonSerializableBody,
            None,
        )
        .await;

        match result {
            Err(GatewayError::InvalidRequest { message }) => {
                assert!(
                    message.contains("failed to serialize request"),
                    "unexpected message: {message}"
                );
            }
            Ok(_) => panic!("expected error for non serializable body"),
            Err(other) => panic!("unexpected error type: {other:?}"),
        }
    }

    #[tokio::test]
    async fn collect_stream_text_joins_chunks() {
        let body: HttpBodyStream = Box::pin(futures_util::stream::iter(vec![
            Ok(b"{\"error\":".to_vec()),
            Ok(b"\"nope\"}".to_vec()),
        ]));
        let text = collect_stream_text(body, "test").await.expect("text");
        assert_eq!(text, "{\"error\":\"nope\"}");
    }
}
