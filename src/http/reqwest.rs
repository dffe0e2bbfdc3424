use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;

use crate::error::GatewayError;

use super::{
    DynHttpTransport, HttpBodyStream, HttpRequest, HttpResponse, HttpStreamResponse, HttpTransport,
};

/// Default [`HttpTransport`] backed by a pooled `reqwest::Client`.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Wraps a caller-configured client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a transport with reqwest's default connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Protocol`] when the TLS backend cannot be initialized.
    pub fn default_client() -> Result<Self, GatewayError> {
        Client::builder()
            .build()
            .map(Self::new)
            .map_err(|err| GatewayError::protocol("http", format!("failed to create reqwest client: {err}")))
    }

    fn build_request(&self, request: HttpRequest) -> Result<reqwest::RequestBuilder, GatewayError> {
        let HttpRequest {
            url,
            headers,
            body,
            timeout,
        } = request;
        let mut builder = self.client.post(&url);

        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        for (name, value) in headers {
            let header_name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| GatewayError::invalid_request(format!("invalid header name: {err}")))?;
            let header_value = reqwest::header::HeaderValue::from_str(&value).map_err(|err| {
                GatewayError::invalid_request(format!("invalid header value for {header_name}: {err}"))
            })?;
            builder = builder.header(header_name, header_value);
        }

        Ok(builder.body(body))
    }

    fn headers_to_map(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
        headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect()
    }
}

/// Maps a reqwest failure into the canonical taxonomy.
///
/// Failing to obtain any response (timeout, refused or reset connection) is a timeout
/// from the caller's point of view; everything else is a protocol failure.
fn map_reqwest_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() || err.is_connect() {
        GatewayError::timeout(err.to_string())
    } else {
        GatewayError::protocol("http", err.to_string())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, GatewayError> {
        let response = self
            .build_request(request)?
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let headers = Self::headers_to_map(response.headers());
        let body = response.bytes().await.map_err(map_reqwest_error)?.to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, GatewayError> {
        let response = self
            .build_request(request)?
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let headers = Self::headers_to_map(response.headers());
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(map_reqwest_error));
        let body: HttpBodyStream = Box::pin(stream);

        Ok(HttpStreamResponse {
            status,
            headers,
            body,
        })
    }
}

/// Convenience constructor for a shared reqwest-backed transport.
///
/// # Errors
///
/// Propagates [`ReqwestTransport::default_client`] failures.
pub fn default_dyn_transport() -> Result<DynHttpTransport, GatewayError> {
    Ok(Arc::new(ReqwestTransport::default_client()?))
}
