use crate::provider::{clamp_temperature, fold_conversation};
use crate::types::{ChatRequest, Role};

use super::types::{GeminiBody, GeminiContent, GeminiGenerationConfig, GeminiPart};

const MAX_TEMPERATURE: f32 = 2.0;

pub(crate) fn build_gemini_body(request: &ChatRequest) -> GeminiBody {
    let folded = fold_conversation(&request.messages);
    GeminiBody {
        contents: folded
            .turns
            .into_iter()
            .map(|(role, text)| GeminiContent {
                role: Some(match role {
                    Role::Assistant => "model",
                    _ => "user",
                }),
                parts: vec![GeminiPart { text }],
            })
            .collect(),
        system_instruction: folded.system.map(|text| GeminiContent {
            role: None,
            parts: vec![GeminiPart { text }],
        }),
        generation_config: GeminiGenerationConfig {
            temperature: clamp_temperature(request.temperature, MAX_TEMPERATURE),
            max_output_tokens: request.max_tokens,
        },
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::Message;

    #[test]
    fn assistant_turns_are_renamed_to_model() {
        let request = ChatRequest::new(vec![
            Message::system("Be kind."),
            Message::user("hi"),
            Message::assistant("hello"),
            Message::user("bye"),
        ])
        .with_max_tokens(100);
        let body = serde_json::to_value(build_gemini_body(&request)).unwrap();
        assert_eq!(
            body["contents"],
            json!([
                {"role": "user", "parts": [{"text": "hi"}]},
                {"role": "model", "parts": [{"text": "hello"}]},
                {"role": "user", "parts": [{"text": "bye"}]}
            ])
        );
        assert_eq!(body["systemInstruction"], json!({"parts": [{"text": "Be kind."}]}));
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 100);
    }

    #[test]
    fn optional_fields_are_omitted() {
        let request = ChatRequest::new(vec![Message::user("hi")]);
        let body = serde_json::to_value(build_gemini_body(&request)).unwrap();
        assert!(body.get("systemInstruction").is_none());
        assert!(body["generationConfig"].get("maxOutputTokens").is_none());
    }
}
