use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::error::GatewayError;
use crate::http::{
    DynHttpTransport, collect_stream_text, post_json_stream_with_headers, post_json_with_headers,
};
use crate::provider::{ChunkStream, LLMProvider, resolve_model};
use crate::search::{DynSearchProvider, web_search_tool};
use crate::stream::NdjsonDecoder;
use crate::types::{ChatRequest, ChatResponse, ProviderKind};

use super::error::parse_ollama_error;
use super::request::{build_ollama_body, convert_messages};
use super::response::map_response;
use super::stream::create_stream;
use super::tools::execute_tool_calls;
use super::types::{OllamaChatBody, OllamaChatResponse, OllamaMessage, OllamaToolCall};

pub(crate) const PROVIDER_NAME: &str = "ollama";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3.2";
/// Upper bound on search-and-reissue cycles per generation.
pub const DEFAULT_MAX_TOOL_ROUNDS: u32 = 1;

/// Adapter for a local or proxied Ollama server.
///
/// When a [`crate::search::SearchProvider`] is attached, requests with
/// `tools_enabled` advertise the `web_search` tool and the adapter runs the search
/// itself before re-issuing the call with the results in the conversation.
pub struct OllamaProvider {
    pub(crate) transport: DynHttpTransport,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) default_model: String,
    pub(crate) request_timeout: Option<Duration>,
    pub(crate) search: Option<DynSearchProvider>,
    pub(crate) max_tool_rounds: u32,
    pub(crate) tool_models: Vec<String>,
}

impl OllamaProvider {
    pub fn new(transport: DynHttpTransport) -> Self {
        Self {
            transport,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            default_model: DEFAULT_MODEL.to_string(),
            request_timeout: None,
            search: None,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            tool_models: Vec::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Bearer token for deployments behind an authenticating proxy.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
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

    pub fn with_search(mut self, search: DynSearchProvider) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: u32) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    /// Restricts tool advertising to models whose name contains one of `patterns`
    /// (case-insensitive). An empty list allows every model.
    pub fn with_tool_models<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tool_models = patterns
            .into_iter()
            .map(|pattern| pattern.into().trim().to_ascii_lowercase())
            .filter(|pattern| !pattern.is_empty())
            .collect();
        self
    }

    pub(crate) fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/api") {
            format!("{base}/chat")
        } else {
            format!("{base}/api/chat")
        }
    }

    fn build_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        if let Some(key) = &self.api_key {
            headers.insert("Authorization".to_string(), format!("Bearer {key}"));
        }
        headers
    }

    fn supports_tools(&self, model: &str) -> bool {
        let model = model.to_ascii_lowercase();
        self.tool_models.is_empty()
            || self
                .tool_models
                .iter()
                .any(|pattern| model.contains(pattern.as_str()))
    }

    fn session(&self, request: &ChatRequest) -> OllamaSession {
        let model = resolve_model(request, &self.default_model);
        let search = if request.tools_enabled && self.supports_tools(&model) {
            self.search.clone()
        } else {
            None
        };
        OllamaSession {
            transport: self.transport.clone(),
            endpoint: self.endpoint(),
            headers: self.build_headers(),
            timeout: self.request_timeout,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            messages: convert_messages(&request.messages),
            model,
            search,
            max_tool_rounds: self.max_tool_rounds,
            rounds: 0,
        }
    }
}

/// Per-generation state: the growing conversation and the tool rounds used so far.
pub(crate) struct OllamaSession {
    transport: DynHttpTransport,
    endpoint: String,
    headers: HashMap<String, String>,
    timeout: Option<Duration>,
    pub(crate) model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    pub(crate) messages: Vec<OllamaMessage>,
    /// Present only when this request may use tools.
    search: Option<DynSearchProvider>,
    max_tool_rounds: u32,
    pub(crate) rounds: u32,
}

impl OllamaSession {
    pub(crate) fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub(crate) fn tools_advertised(&self) -> bool {
        self.search.is_some() && self.rounds < self.max_tool_rounds
    }

    fn body(&self, stream: bool) -> OllamaChatBody<'_> {
        build_ollama_body(
            &self.model,
            &self.messages,
            self.temperature,
            self.max_tokens,
            stream,
            self.tools_advertised().then(|| vec![web_search_tool()]),
        )
    }

    pub(crate) async fn send(&self) -> Result<OllamaChatResponse, GatewayError> {
        let response = post_json_with_headers(
            self.transport.as_ref(),
            self.endpoint.clone(),
            self.headers.clone(),
            &self.body(false),
            self.timeout,
        )
        .await?;
        let text = response.text(PROVIDER_NAME)?;
        if !response.is_success() {
            let err = parse_ollama_error(response.status, &response.headers, &text);
            warn!(status = response.status, error = %err, "ollama chat failed");
            return Err(err);
        }
        serde_json::from_str(&text).map_err(|err| {
            GatewayError::protocol(PROVIDER_NAME, format!("failed to parse response: {err}"))
        })
    }

    pub(crate) async fn open_stream(&self) -> Result<NdjsonDecoder, GatewayError> {
        let response = post_json_stream_with_headers(
            self.transport.as_ref(),
            self.endpoint.clone(),
            self.headers.clone(),
            &self.body(true),
        )
        .await?;
        if !response.is_success() {
            let text = collect_stream_text(response.body, PROVIDER_NAME).await?;
            let err = parse_ollama_error(response.status, &response.headers, &text);
            warn!(status = response.status, error = %err, "ollama chat stream rejected");
            return Err(err);
        }
        Ok(NdjsonDecoder::new(response.body, PROVIDER_NAME))
    }

    /// Appends the assistant turn that requested `calls` followed by one `tool` message
    /// per call, and consumes one round.
    pub(crate) async fn run_tool_round(&mut self, content: String, calls: Vec<OllamaToolCall>) {
        self.rounds += 1;
        debug!(round = self.rounds, calls = calls.len(), "running tool round");
        let results = match &self.search {
            Some(search) => execute_tool_calls(search, &calls).await,
            None => Vec::new(),
        };
        let mut assistant = OllamaMessage::new("assistant", content);
        assistant.tool_calls = calls;
        self.messages.push(assistant);
        self.messages.extend(results);
    }
}

#[async_trait]
impl LLMProvider for OllamaProvider {
    #[instrument(skip(self, request), fields(provider = PROVIDER_NAME, messages = request.messages.len()))]
    async fn generate(&self, request: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        let mut session = self.session(request);
        debug!(model = %session.model, tools = session.tools_advertised(), "sending chat request");
        loop {
            let advertised = session.tools_advertised();
            let response = session.send().await?;
            let tool_request = response
                .message
                .as_ref()
                .filter(|message| advertised && !message.tool_calls.is_empty())
                .cloned();
            match tool_request {
                Some(message) => {
                    session
                        .run_tool_round(message.content, message.tool_calls)
                        .await;
                }
                None => return map_response(response, &session.model),
            }
        }
    }

    #[instrument(skip(self, request), fields(provider = PROVIDER_NAME, messages = request.messages.len()))]
    async fn generate_stream(&self, request: &ChatRequest) -> Result<ChunkStream, GatewayError> {
        let session = self.session(request);
        debug!(model = %session.model, tools = session.tools_advertised(), "opening chat stream");
        let decoder = session.open_stream().await?;
        Ok(create_stream(session, decoder))
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::http::reqwest::ReqwestTransport;
    use crate::search::{SearchProvider, SearchQuery, SearchResult};
    use crate::types::Message;

    struct NoResults;

    #[async_trait]
    impl SearchProvider for NoResults {
        async fn search(&self, _query: &SearchQuery) -> Result<Vec<SearchResult>, GatewayError> {
            Ok(Vec::new())
        }
    }

    fn provider() -> OllamaProvider {
        let transport = Arc::new(ReqwestTransport::new(reqwest::Client::new()));
        OllamaProvider::new(transport)
    }

    #[test]
    fn endpoint_and_optional_bearer() {
        assert_eq!(provider().endpoint(), "http://localhost:11434/api/chat");
        let proxied = provider()
            .with_base_url("https://ollama.internal/api/")
            .with_api_key("proxy-token");
        assert_eq!(proxied.endpoint(), "https://ollama.internal/api/chat");
        assert_eq!(proxied.build_headers()["Authorization"], "Bearer proxy-token");
        assert!(!provider().build_headers().contains_key("Authorization"));
    }

    #[test]
    fn tools_need_search_flag_and_matching_model() {
        let request = ChatRequest::new(vec![Message::user("hi")]).with_tools(true);
        assert!(!provider().session(&request).tools_advertised());

        let with_search = provider()
            .with_search(Arc::new(NoResults))
            .with_tool_models(["gpt-oss", "Llama"]);
        assert!(with_search.session(&request).tools_advertised());
        assert!(
            !with_search
                .session(&request.clone().with_model("mistral"))
                .tools_advertised()
        );
        assert!(
            !with_search
                .session(&request.with_tools(false))
                .tools_advertised()
        );
    }

    #[tokio::test]
    async fn tool_round_is_bounded_and_extends_history() {
        let provider = provider().with_search(Arc::new(NoResults));
        let request = ChatRequest::new(vec![Message::user("weather?")]).with_tools(true);
        let mut session = provider.session(&request);
        let call: OllamaToolCall = serde_json::from_value(serde_json::json!({
            "function": {"name": "web_search", "arguments": {"query": "weather"}}
        }))
        .unwrap();

        session.run_tool_round(String::new(), vec![call]).await;
        assert!(!session.tools_advertised());
        assert_eq!(session.messages.len(), 3);
        assert_eq!(session.messages[1].role, "assistant");
        assert_eq!(session.messages[1].tool_calls.len(), 1);
        assert_eq!(session.messages[2].content, "No search results found.");

        let body = serde_json::to_value(session.body(false)).unwrap();
        assert!(body.get("tools").is_none());
    }
}
