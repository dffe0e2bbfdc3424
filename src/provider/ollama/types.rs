use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
pub(crate) struct OllamaChatBody<'a> {
    pub(crate) model: &'a str,
    pub(crate) messages: &'a [OllamaMessage],
    pub(crate) stream: bool,
    pub(crate) options: OllamaOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) tools: Option<Vec<Value>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct OllamaOptions {
    pub(crate) temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) num_predict: Option<u32>,
}

/// Message shape shared by requests and responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct OllamaMessage {
    pub(crate) role: String,
    #[serde(default)]
    pub(crate) content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) tool_calls: Vec<OllamaToolCall>,
    /// Names the tool a `tool` message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) tool_name: Option<String>,
}

impl OllamaMessage {
    pub(crate) fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            tool_calls: Vec::new(),
            tool_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct OllamaToolCall {
    pub(crate) function: OllamaFunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct OllamaFunctionCall {
    pub(crate) name: String,
    /// Usually an object, some models send a JSON string.
    #[serde(default)]
    pub(crate) arguments: Value,
}

/// One `/api/chat` object: the whole buffered response or one NDJSON line.
#[derive(Debug, Deserialize)]
pub(crate) struct OllamaChatResponse {
    #[serde(default)]
    pub(crate) model: Option<String>,
    #[serde(default)]
    pub(crate) message: Option<OllamaMessage>,
    #[serde(default)]
    pub(crate) done: bool,
    #[serde(default)]
    pub(crate) done_reason: Option<String>,
    #[serde(default)]
    pub(crate) prompt_eval_count: Option<u64>,
    #[serde(default)]
    pub(crate) eval_count: Option<u64>,
    #[serde(default)]
    pub(crate) error: Option<String>,
}
