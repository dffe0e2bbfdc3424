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

use super::error::parse_gemini_error;
use super::request::build_gemini_body;
use super::response::map_response;
use super::stream::create_stream;
use super::types::GeminiResponse;

pub(crate) const PROVIDER_NAME: &str = "gemini";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Adapter for Gemini `generateContent` / `streamGenerateContent`.
pub struct GoogleGeminiProvider {
    pub(crate) transport: DynHttpTransport,
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) default_model: String,
    pub(crate) request_timeout: Option<Duration>,
}

impl GoogleGeminiProvider {
    pub fn new(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            default_model: DEFAULT_MODEL.to_string(),
            request_timeout: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    fn model_url(&self, model: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let model_path = normalize_model(model);
        if base.ends_with("/v1beta") || base.ends_with("/v1") {
            format!("{base}/{model_path}")
        } else {
            format!("{base}/v1beta/{model_path}")
        }
    }

    pub(crate) fn endpoint(&self, model: &str) -> String {
        format!("{}:generateContent", self.model_url(model))
    }

    pub(crate) fn stream_endpoint(&self, model: &str) -> String {
        format!("{}:streamGenerateContent?alt=sse", self.model_url(model))
    }

    fn build_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("x-goog-api-key".to_string(), self.api_key.clone());
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers
    }
}

fn normalize_model(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

#[async_trait]
impl LLMProvider for GoogleGeminiProvider {
    #[instrument(skip(self, request), fields(provider = PROVIDER_NAME, messages = request.messages.len()))]
    async fn generate(&self, request: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        let model = resolve_model(request, &self.default_model);
        let body = build_gemini_body(request);
        debug!(model = %model, "sending generateContent request");

        let response = post_json_with_headers(
            self.transport.as_ref(),
            self.endpoint(&model),
            self.build_headers(),
            &body,
            self.request_timeout,
        )
        .await?;
        let text = response.text(PROVIDER_NAME)?;
        if !response.is_success() {
            let err = parse_gemini_error(response.status, &response.headers, &text);
            warn!(status = response.status, error = %err, "generateContent failed");
            return Err(err);
        }

        let parsed: GeminiResponse = serde_json::from_str(&text).map_err(|err| {
            GatewayError::protocol(PROVIDER_NAME, format!("failed to parse response: {err}"))
        })?;
        map_response(parsed, &model)
    }

    #[instrument(skip(self, request), fields(provider = PROVIDER_NAME, messages = request.messages.len()))]
    async fn generate_stream(&self, request: &ChatRequest) -> Result<ChunkStream, GatewayError> {
        let model = resolve_model(request, &self.default_model);
        let body = build_gemini_body(request);
        debug!(model = %model, "opening streamGenerateContent");

        let response = post_json_stream_with_headers(
            self.transport.as_ref(),
            self.stream_endpoint(&model),
            self.build_headers(),
            &body,
        )
        .await?;
        if !response.is_success() {
            let text = collect_stream_text(response.body, PROVIDER_NAME).await?;
            let err = parse_gemini_error(response.status, &response.headers, &text);
            warn!(status = response.status, error = %err, "streamGenerateContent rejected");
            return Err(err);
        }
        Ok(create_stream(response.body))
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }
}
