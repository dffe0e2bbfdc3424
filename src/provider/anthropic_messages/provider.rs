use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::error::GatewayError;
use crate::http::{
    DynHttpTransport, collect_stream_text, post_json_stream_with_headers, post_json_with_headers,
};
use crate::provider::{ChunkStream, LLMProvider, resolve_model};
use crate::types::{ChatRequest, ChatResponse, ProviderKind};

use super::error::parse_anthropic_error;
use super::request::build_anthropic_body;
use super::response::map_response;
use super::stream::create_stream;
use super::types::AnthropicResponse;

pub(crate) const PROVIDER_NAME: &str = "anthropic";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
/// Value of the `anthropic-version` header.
pub const DEFAULT_VERSION: &str = "2023-06-01";
/// The Messages API requires `max_tokens`; used when the request leaves it unset.
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Adapter for the Anthropic Messages API.
pub struct AnthropicMessagesProvider {
    pub(crate) transport: DynHttpTransport,
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) version: String,
    pub(crate) beta: Option<String>,
    pub(crate) default_model: String,
    pub(crate) default_max_tokens: u32,
    pub(crate) request_timeout: Option<Duration>,
}

impl AnthropicMessagesProvider {
    pub fn new(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            version: DEFAULT_VERSION.to_string(),
            beta: None,
            default_model: DEFAULT_MODEL.to_string(),
            default_max_tokens: DEFAULT_MAX_TOKENS,
            request_timeout: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Sets the `anthropic-beta` header.
    pub fn with_beta(mut self, beta: impl Into<String>) -> Self {
        self.beta = Some(beta.into());
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_default_max_tokens(mut self, max_tokens: u32) -> Self {
        self.default_max_tokens = max_tokens;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub(crate) fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/messages")
        } else {
            format!("{base}/v1/messages")
        }
    }

    fn build_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("x-api-key".to_string(), self.api_key.clone());
        headers.insert("anthropic-version".to_string(), self.version.clone());
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        if let Some(beta) = &self.beta {
            headers.insert("anthropic-beta".to_string(), beta.clone());
        }
        headers
    }

    fn max_tokens(&self, request: &ChatRequest) -> u32 {
        request.max_tokens.unwrap_or(self.default_max_tokens)
    }
}

#[async_trait]
impl LLMProvider for AnthropicMessagesProvider {
    #[instrument(skip(self, request), fields(provider = PROVIDER_NAME, messages = request.messages.len()))]
    async fn generate(&self, request: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        let model = resolve_model(request, &self.default_model);
        let body = build_anthropic_body(request, &model, self.max_tokens(request), false);
        debug!(model = %model, "sending messages request");

        let response = post_json_with_headers(
            self.transport.as_ref(),
            self.endpoint(),
            self.build_headers(),
            &body,
            self.request_timeout,
        )
        .await?;
        let text = response.text(PROVIDER_NAME)?;
        if !response.is_success() {
            let err = parse_anthropic_error(response.status, &response.headers, &text);
            warn!(status = response.status, error = %err, "messages request failed");
            return Err(err);
        }

        let parsed: AnthropicResponse = serde_json::from_str(&text).map_err(|err| {
            GatewayError::protocol(PROVIDER_NAME, format!("failed to parse response: {err}"))
        })?;
        map_response(parsed, &model)
    }

    #[instrument(skip(self, request), fields(provider = PROVIDER_NAME, messages = request.messages.len()))]
    async fn generate_stream(&self, request: &ChatRequest) -> Result<ChunkStream, GatewayError> {
        let model = resolve_model(request, &self.default_model);
        let body = build_anthropic_body(request, &model, self.max_tokens(request), true);
        debug!(model = %model, "opening messages stream");

        let response = post_json_stream_with_headers(
            self.transport.as_ref(),
            self.endpoint(),
            self.build_headers(),
            &body,
        )
        .await?;
        if !response.is_success() {
            let text = collect_stream_text(response.body, PROVIDER_NAME).await?;
            let err = parse_anthropic_error(response.status, &response.headers, &text);
            warn!(status = response.status, error = %err, "messages stream rejected");
            return Err(err);
        }
        Ok(create_stream(response.body))
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }
}
