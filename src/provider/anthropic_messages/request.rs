use crate::provider::{clamp_temperature, fold_conversation};
use crate::types::{ChatRequest, Role};

use super::types::{AnthropicBody, AnthropicWireMessage};

/// Messages API rejects temperatures above 1.
const MAX_TEMPERATURE: f32 = 1.0;

/// Builds the Messages body.
///
/// System turns move into the top-level `system` field and adjacent turns of the same
/// author are merged, since the API requires alternating roles.
pub(crate) fn build_anthropic_body<'a>(
    request: &ChatRequest,
    model: &'a str,
    max_tokens: u32,
    stream: bool,
) -> AnthropicBody<'a> {
    let folded = fold_conversation(&request.messages);
    AnthropicBody {
        model,
        system: folded.system,
        messages: folded
            .turns
            .into_iter()
            .map(|(role, content)| AnthropicWireMessage {
                role: match role {
                    Role::Assistant => "assistant",
                    _ => "user",
                },
                content,
            })
            .collect(),
        max_tokens,
        temperature: clamp_temperature(request.temperature, MAX_TEMPERATURE),
        stream,
    }
}
