use crate::provider::clamp_temperature;
use crate::types::{ChatRequest, Role};

use super::types::{OpenAiChatBody, OpenAiWireMessage};

/// Chat Completions accepts the full `[0, 2]` range.
const MAX_TEMPERATURE: f32 = 2.0;

pub(crate) fn build_openai_body<'a>(
    request: &'a ChatRequest,
    model: &'a str,
    stream: bool,
) -> OpenAiChatBody<'a> {
    OpenAiChatBody {
        model,
        messages: request
            .messages
            .iter()
            .map(|message| OpenAiWireMessage {
                role: wire_role(message.role),
                content: &message.content,
            })
            .collect(),
        temperature: clamp_temperature(request.temperature, MAX_TEMPERATURE),
        max_tokens: request.max_tokens,
        stream,
    }
}

/// `tool` turns need a `tool_call_id` upstream, which the canonical model does not carry.
fn wire_role(role: Role) -> &'static str {
    match role {
        Role::Tool => Role::User.as_str(),
        other => other.as_str(),
    }
}
