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

use super::error::parse_openai_error;
use super::request::build_openai_body;
use super::response::map_response;
use super::stream::create_stream;
use super::types::OpenAiChatResponse;

pub(crate) const PROVIDER_NAME: &str = "openai";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
/// Model used when neither the request nor the configuration names one.
pub const DEFAULT_MODEL: &str = "gpt-4";

/// Adapter for OpenAI Chat Completions and servers that mimic it.
pub struct OpenAiChatProvider {
    pub(crate) transport: DynHttpTransport,
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) organization: Option<String>,
    pub(crate) project: Option<String>,
    pub(crate) default_model: String,
    pub(crate) request_timeout: Option<Duration>,
}

impl OpenAiChatProvider {
    pub fn new(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            organization: None,
            project: None,
            default_model: DEFAULT_MODEL.to_string(),
            request_timeout: None,
        }
    }

    /// Points the adapter at a compatible server. Both `https://host` and
    /// `https://host/v1` are accepted.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Deadline handed to the transport for buffered calls.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub(crate) fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/chat/completions")
        } else {
            format!("{base}/v1/chat/completions")
        }
    }

    fn build_headers(&self, stream: bool) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert(
            "Authorization".to_string(),
            format!("Bearer {}", self.api_key),
        );
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        let accept = if stream {
            "text/event-stream"
        } else {
            "application/json"
        };
        headers.insert("Accept".to_string(), accept.to_string());
        if let Some(org) = &self.organization {
            headers.insert("OpenAI-Organization".to_string(), org.clone());
        }
        if let Some(project) = &self.project {
            headers.insert("OpenAI-Project".to_string(), project.clone());
        }
        headers
    }
}

#[async_trait]
impl LLMProvider for OpenAiChatProvider {
    #[instrument(skip(self, request), fields(provider = PROVIDER_NAME, messages = request.messages.len()))]
    async fn generate(&self, request: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        let model = resolve_model(request, &self.default_model);
        let body = build_openai_body(request, &model, false);
        debug!(model = %model, "sending chat completion request");

        let response = post_json_with_headers(
            self.transport.as_ref(),
            self.endpoint(),
            self.build_headers(false),
            &body,
            self.request_timeout,
        )
        .await?;
        let text = response.text(PROVIDER_NAME)?;
        if !response.is_success() {
            let err = parse_openai_error(response.status, &response.headers, &text);
            warn!(status = response.status, error = %err, "chat completion failed");
            return Err(err);
        }

        let parsed: OpenAiChatResponse = serde_json::from_str(&text).map_err(|err| {
            GatewayError::protocol(PROVIDER_NAME, format!("failed to parse response: {err}"))
        })?;
        map_response(parsed, &model)
    }

    #[instrument(skip(self, request), fields(provider = PROVIDER_NAME, messages = request.messages.len()))]
    async fn generate_stream(&self, request: &ChatRequest) -> Result<ChunkStream, GatewayError> {
        let model = resolve_model(request, &self.default_model);
        let body = build_openai_body(request, &model, true);
        debug!(model = %model, "opening chat completion stream");

        let response = post_json_stream_with_headers(
            self.transport.as_ref(),
            self.endpoint(),
            self.build_headers(true),
            &body,
        )
        .await?;
        if !response.is_success() {
            let text = collect_stream_text(response.body, PROVIDER_NAME).await?;
            let err = parse_openai_error(response.status, &response.headers, &text);
            warn!(status = response.status, error = %err, "chat completion stream rejected");
            return Err(err);
        }
        Ok(create_stream(response.body))
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }
}
