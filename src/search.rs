//! Web search collaborator behind the `web_search` tool.
//!
//! The core only depends on [`SearchProvider`]; [`ExaSearch`] is the HTTP implementation
//! wired in by configuration.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::error::GatewayError;
use crate::http::{DynHttpTransport, post_json_with_headers};

/// Name of the function advertised to tool-capable models.
pub const WEB_SEARCH_TOOL: &str = "web_search";
pub const DEFAULT_NUM_RESULTS: u32 = 5;
/// How many results are folded into the conversation.
pub const MAX_FORMATTED_RESULTS: usize = 3;
const SNIPPET_CHARS: usize = 500;
const EXA_ENDPOINT: &str = "https://api.exa.ai/search";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchCategory {
    News,
    Papers,
    Company,
    Tweet,
    Github,
    PersonalSite,
}

impl SearchCategory {
    pub const ALL: [SearchCategory; 6] = [
        SearchCategory::News,
        SearchCategory::Papers,
        SearchCategory::Company,
        SearchCategory::Tweet,
        SearchCategory::Github,
        SearchCategory::PersonalSite,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SearchCategory::News => "news",
            SearchCategory::Papers => "papers",
            SearchCategory::Company => "company",
            SearchCategory::Tweet => "tweet",
            SearchCategory::Github => "github",
            SearchCategory::PersonalSite => "personal_site",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
    }
}

/// Arguments of one `web_search` invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchQuery {
    pub query: String,
    pub num_results: u32,
    pub category: Option<SearchCategory>,
    pub include_domains: Option<Vec<String>>,
    pub exclude_domains: Option<Vec<String>>,
}

/// Loose mirror of the tool schema. Models are sloppy with types, so numbers may
/// arrive as strings and categories outside the enum are dropped.
#[derive(Debug, Deserialize)]
struct RawArguments {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    num_results: Option<Value>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    include_domains: Option<Vec<String>>,
    #[serde(default)]
    exclude_domains: Option<Vec<String>>,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            num_results: DEFAULT_NUM_RESULTS,
            category: None,
            include_domains: None,
            exclude_domains: None,
        }
    }

    pub fn with_num_results(mut self, num_results: u32) -> Self {
        self.num_results = num_results;
        self
    }

    pub fn with_category(mut self, category: SearchCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// Parses tool-call arguments, given either as a JSON object or as a string
    /// containing one.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ToolExecution`] when the arguments are not an object or
    /// the query is missing or blank.
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_gateway::search::SearchQuery;
    /// use serde_json::json;
    ///
    /// let query = SearchQuery::from_arguments(&json!("{\"query\":\"rust\",\"num_results\":\"2\"}")).unwrap();
    /// assert_eq!(query.query, "rust");
    /// assert_eq!(query.num_results, 2);
    /// ```
    pub fn from_arguments(arguments: &Value) -> Result<Self, GatewayError> {
        let parsed: Value = match arguments {
            Value::String(text) => serde_json::from_str(text)
                .map_err(|err| tool_error(format!("arguments are not valid JSON: {err}")))?,
            other => other.clone(),
        };
        let raw: RawArguments = serde_json::from_value(parsed)
            .map_err(|err| tool_error(format!("unexpected arguments: {err}")))?;

        let query = raw
            .query
            .map(|query| query.trim().to_string())
            .filter(|query| !query.is_empty())
            .ok_or_else(|| tool_error("missing required argument `query`"))?;
        let num_results = match raw.num_results {
            Some(Value::Number(number)) => number.as_u64(),
            Some(Value::String(text)) => text.trim().parse().ok(),
            _ => None,
        }
        .and_then(|value| u32::try_from(value).ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_NUM_RESULTS);
        let category = raw.category.as_deref().and_then(|value| {
            let parsed = SearchCategory::parse(value);
            if parsed.is_none() {
                debug!(category = value, "ignoring unknown search category");
            }
            parsed
        });

        Ok(Self {
            query,
            num_results,
            category,
            include_domains: raw.include_domains.filter(|domains| !domains.is_empty()),
            exclude_domains: raw.exclude_domains.filter(|domains| !domains.is_empty()),
        })
    }
}

fn tool_error(message: impl Into<String>) -> GatewayError {
    GatewayError::ToolExecution {
        tool: WEB_SEARCH_TOOL.to_string(),
        message: message.into(),
    }
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub published_date: Option<String>,
}

/// Search backend consumed by the tool round.
///
/// Implementations report every failure as [`GatewayError::SearchUnavailable`].
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, GatewayError>;
}

pub type DynSearchProvider = Arc<dyn SearchProvider>;

/// Function schema advertised to the model.
pub fn web_search_tool() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": WEB_SEARCH_TOOL,
            "description": "Search the web for current information",
            "parameters": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query"
                    },
                    "num_results": {
                        "type": "integer",
                        "description": "Number of results to return (default: 5)",
                        "default": DEFAULT_NUM_RESULTS
                    },
                    "category": {
                        "type": "string",
                        "description": "Category filter",
                        "enum": SearchCategory::ALL.map(SearchCategory::as_str)
                    },
                    "include_domains": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Only return results from these domains"
                    },
                    "exclude_domains": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Never return results from these domains"
                    }
                },
                "required": ["query"]
            }
        }
    })
}

/// Renders results as the context block handed back to the model.
///
/// # Examples
///
/// ```
/// use llm_gateway::search::{SearchResult, format_for_llm};
///
/// assert_eq!(format_for_llm(&[], 3), "No search results found.");
/// let results = vec![SearchResult {
///     title: "Rust".into(),
///     url: "https://rust-lang.org".into(),
///     snippet: String::new(),
///     published_date: None,
/// }];
/// assert_eq!(
///     format_for_llm(&results, 3),
///     "Web Search Results:\n\n1. **Rust**\n   URL: https://rust-lang.org\n\n"
/// );
/// ```
pub fn format_for_llm(results: &[SearchResult], max_results: usize) -> String {
    if results.is_empty() {
        return "No search results found.".to_string();
    }

    let mut formatted = String::from("Web Search Results:\n\n");
    for (index, result) in results.iter().take(max_results).enumerate() {
        let _ = writeln!(formatted, "{}. **{}**", index + 1, result.title);
        let _ = writeln!(formatted, "   URL: {}", result.url);
        if !result.snippet.is_empty() {
            let _ = writeln!(formatted, "   Summary: {}", result.snippet);
        }
        if let Some(date) = &result.published_date {
            let _ = writeln!(formatted, "   Published: {date}");
        }
        formatted.push('\n');
    }
    formatted
}

/// [`SearchProvider`] backed by the Exa search API.
pub struct ExaSearch {
    transport: DynHttpTransport,
    api_key: String,
    endpoint: String,
    timeout: Option<Duration>,
}

#[derive(Debug, Deserialize)]
struct ExaResponse {
    #[serde(default)]
    results: Vec<ExaResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExaResult {
    #[serde(default)]
    title: Option<String>,
    url: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    published_date: Option<String>,
}

impl ExaSearch {
    pub fn new(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        Self {
            transport,
            api_key: api_key.into(),
            endpoint: EXA_ENDPOINT.to_string(),
            timeout: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn build_body(query: &SearchQuery) -> Value {
        let mut body = json!({
            "query": query.query,
            "numResults": query.num_results,
            "useAutoprompt": true,
            "contents": {"text": {"maxCharacters": SNIPPET_CHARS}},
        });
        if let Some(category) = query.category {
            body["category"] = Value::from(category.as_str());
        }
        if let Some(domains) = &query.include_domains {
            body["includeDomains"] = json!(domains);
        }
        if let Some(domains) = &query.exclude_domains {
            body["excludeDomains"] = json!(domains);
        }
        body
    }
}

fn unavailable(message: impl Into<String>) -> GatewayError {
    GatewayError::SearchUnavailable {
        message: message.into(),
    }
}

#[async_trait]
impl SearchProvider for ExaSearch {
    #[instrument(skip(self), fields(query = %query.query))]
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, GatewayError> {
        let headers = HashMap::from([
            ("x-api-key".to_string(), self.api_key.clone()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ]);
        let response = post_json_with_headers(
            self.transport.as_ref(),
            self.endpoint.clone(),
            headers,
            &Self::build_body(query),
            self.timeout,
        )
        .await
        .map_err(|err| unavailable(err.to_string()))?;

        let text = String::from_utf8_lossy(&response.body);
        if !response.is_success() {
            return Err(unavailable(format!(
                "exa returned status {}: {}",
                response.status,
                crate::provider::snippet(&text)
            )));
        }
        let parsed: ExaResponse = serde_json::from_str(&text)
            .map_err(|err| unavailable(format!("failed to parse exa response: {err}")))?;

        let results: Vec<SearchResult> = parsed
            .results
            .into_iter()
            .map(|result| SearchResult {
                title: result
                    .title
                    .filter(|title| !title.trim().is_empty())
                    .unwrap_or_else(|| "No title".to_string()),
                url: result.url,
                snippet: result
                    .text
                    .map(|text| text.chars().take(SNIPPET_CHARS).collect())
                    .unwrap_or_default(),
                published_date: result.published_date,
            })
            .collect();
        debug!(results = results.len(), "search completed");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::ErrorKind;
    use crate::http::{HttpRequest, HttpResponse, HttpStreamResponse, HttpTransport};

    struct CannedTransport {
        status: u16,
        body: String,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl CannedTransport {
        fn new(status: u16, body: &str) -> Arc<Self> {
            Arc::new(Self {
                status,
                body: body.to_string(),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HttpTransport for CannedTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, GatewayError> {
            self.requests.lock().unwrap().push(request);
            Ok(HttpResponse {
                status: self.status,
                headers: HashMap::new(),
                body: self.body.clone().into_bytes(),
            })
        }

        async fn send_stream(&self, _request: HttpRequest) -> Result<HttpStreamResponse, GatewayError> {
            panic!("search never streams");
        }
    }

    #[test]
    fn arguments_accept_objects_and_ignore_unknown_categories() {
        let query = SearchQuery::from_arguments(&json!({
            "query": " current weather ",
            "category": "NEWS",
            "include_domains": [],
            "exclude_domains": ["example.com"]
        }))
        .unwrap();
        assert_eq!(query.query, "current weather");
        assert_eq!(query.num_results, DEFAULT_NUM_RESULTS);
        assert_eq!(query.category, Some(SearchCategory::News));
        assert!(query.include_domains.is_none());
        assert_eq!(query.exclude_domains, Some(vec!["example.com".to_string()]));

        let loose = SearchQuery::from_arguments(&json!({"query": "x", "category": "blogs"})).unwrap();
        assert!(loose.category.is_none());
    }

    #[test]
    fn missing_query_is_tool_error() {
        let err = SearchQuery::from_arguments(&json!({"num_results": 3})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolExecution);
        let err = SearchQuery::from_arguments(&json!("not json")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolExecution);
    }

    #[test]
    fn formatting_keeps_top_three_with_optional_lines() {
        let results: Vec<SearchResult> = (1..=4)
            .map(|i| SearchResult {
                title: format!("Title {i}"),
                url: format!("https://example.com/{i}"),
                snippet: if i == 1 { "Sunny".to_string() } else { String::new() },
                published_date: (i == 2).then(|| "2024-05-01".to_string()),
            })
            .collect();
        let formatted = format_for_llm(&results, MAX_FORMATTED_RESULTS);
        assert!(formatted.starts_with("Web Search Results:\n\n1. **Title 1**\n"));
        assert!(formatted.contains("   Summary: Sunny\n"));
        assert!(formatted.contains("   Published: 2024-05-01\n"));
        assert!(formatted.contains("3. **Title 3**"));
        assert!(!formatted.contains("Title 4"));
    }

    #[test]
    fn tool_schema_requires_query() {
        let tool = web_search_tool();
        assert_eq!(tool["function"]["name"], WEB_SEARCH_TOOL);
        assert_eq!(tool["function"]["parameters"]["required"], json!(["query"]));
        assert_eq!(
            tool["function"]["parameters"]["properties"]["category"]["enum"][5],
            "personal_site"
        );
    }

    #[tokio::test]
    async fn exa_results_are_mapped_and_truncated() {
        let long_text = "a".repeat(700);
        let body = json!({
            "results": [
                {"title": "Weather", "url": "https://w.example", "text": long_text, "publishedDate": "2024-01-01"},
                {"url": "https://untitled.example"}
            ]
        })
        .to_string();
        let transport = CannedTransport::new(200, &body);
        let search = ExaSearch::new(transport.clone(), "exa-key-123");
        let query = SearchQuery::new("weather").with_category(SearchCategory::News);

        let results = search.search(&query).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].snippet.chars().count(), SNIPPET_CHARS);
        assert_eq!(results[1].title, "No title");

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests[0].headers["x-api-key"], "exa-key-123");
        let sent = requests[0].json_body().unwrap();
        assert_eq!(sent["numResults"], 5);
        assert_eq!(sent["category"], "news");
    }

    #[tokio::test]
    async fn exa_failures_are_search_unavailable() {
        let search = ExaSearch::new(CannedTransport::new(401, "{\"error\":\"bad key\"}"), "k");
        let err = search.search(&SearchQuery::new("x")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SearchUnavailable);

        let search = ExaSearch::new(CannedTransport::new(200, "<html>"), "k");
        let err = search.search(&SearchQuery::new("x")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SearchUnavailable);
    }
}
