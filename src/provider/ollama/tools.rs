use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::search::{
    DynSearchProvider, MAX_FORMATTED_RESULTS, SearchQuery, WEB_SEARCH_TOOL, format_for_llm,
};

use super::types::{OllamaMessage, OllamaToolCall};

/// Runs every requested tool call and returns one `tool` message per call, in order.
///
/// Failures never abort the generation: the model is told the tool failed and answers
/// without it.
pub(crate) async fn execute_tool_calls(
    search: &DynSearchProvider,
    calls: &[OllamaToolCall],
) -> Vec<OllamaMessage> {
    let mut results = Vec::with_capacity(calls.len());
    for call in calls {
        let name = call.function.name.as_str();
        let content = if name == WEB_SEARCH_TOOL {
            match run_web_search(search, &call.function.arguments).await {
                Ok(content) => content,
                Err(err) => {
                    warn!(tool = name, error = %err, "tool call failed, continuing without results");
                    format!(
                        "The web search failed ({err}). Answer from your own knowledge and \
                         mention that live search results were unavailable."
                    )
                }
            }
        } else {
            warn!(tool = name, "model requested an unknown tool");
            format!("Unknown tool `{name}`. Only `{WEB_SEARCH_TOOL}` is available.")
        };
        let mut message = OllamaMessage::new("tool", content);
        message.tool_name = Some(name.to_string());
        results.push(message);
    }
    results
}

async fn run_web_search(
    search: &DynSearchProvider,
    arguments: &serde_json::Value,
) -> Result<String, GatewayError> {
    let query = SearchQuery::from_arguments(arguments)?;
    debug!(query = %query.query, num_results = query.num_results, "running web search");
    let results = search
        .search(&query)
        .await
        .map_err(|err| GatewayError::ToolExecution {
            tool: WEB_SEARCH_TOOL.to_string(),
            message: err.to_string(),
        })?;
    Ok(format_for_llm(&results, MAX_FORMATTED_RESULTS))
}
