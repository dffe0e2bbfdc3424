use std::collections::VecDeque;

use serde_json::Value;

use crate::error::GatewayError;
use crate::http::HttpBodyStream;
use crate::provider::ChunkStream;
use crate::stream::{SseDecoder, SseEvent, StreamTranslator, TranslatedStream};
use crate::types::{FinishReason, StreamChunk};

use super::error::stream_error;
use super::provider::PROVIDER_NAME;
use super::response::{candidate_text, convert_finish_reason, no_candidates};
use super::types::{GeminiErrorBody, GeminiResponse};

pub(crate) fn create_stream(body: HttpBodyStream) -> ChunkStream {
    Box::pin(TranslatedStream::new(
        SseDecoder::new(body, PROVIDER_NAME),
        GeminiStreamTranslator,
    ))
}

/// Each SSE event carries a partial `GenerateContentResponse`; the one with a
/// `finishReason` is the last.
pub(crate) struct GeminiStreamTranslator;

impl StreamTranslator for GeminiStreamTranslator {
    type Frame = SseEvent;

    fn translate(
        &mut self,
        frame: SseEvent,
        out: &mut VecDeque<StreamChunk>,
    ) -> Result<(), GatewayError> {
        let data = match frame {
            SseEvent::Done => {
                out.push_back(StreamChunk::finish(FinishReason::Stop));
                return Ok(());
            }
            SseEvent::Message { data, .. } => data,
        };

        let value: Value = serde_json::from_str(&data).map_err(|err| {
            GatewayError::protocol(PROVIDER_NAME, format!("failed to parse stream chunk: {err}"))
        })?;
        if let Some(error) = value.get("error") {
            let parsed: GeminiErrorBody = serde_json::from_value(error.clone()).map_err(|err| {
                GatewayError::protocol(PROVIDER_NAME, format!("unreadable stream error: {err}"))
            })?;
            return Err(stream_error(&parsed));
        }

        let chunk: GeminiResponse = serde_json::from_value(value).map_err(|err| {
            GatewayError::protocol(PROVIDER_NAME, format!("unexpected stream chunk: {err}"))
        })?;
        let candidate = chunk
            .candidates
            .and_then(|candidates| candidates.into_iter().next());
        let Some(candidate) = candidate else {
            let block_reason = chunk.prompt_feedback.and_then(|f| f.block_reason);
            return match block_reason {
                Some(reason) => Err(no_candidates(Some(reason))),
                None => Ok(()),
            };
        };

        let finish_reason = candidate.finish_reason.as_deref().map(convert_finish_reason);
        let text = candidate_text(candidate);
        if !text.is_empty() {
            out.push_back(StreamChunk::delta(text));
        }
        if let Some(reason) = finish_reason {
            out.push_back(StreamChunk::finish(reason));
        }
        Ok(())
    }

    fn finish(&mut self) -> Option<StreamChunk> {
        None
    }

    fn provider(&self) -> &'static str {
        PROVIDER_NAME
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{StreamExt, stream};

    use super::*;
    use crate::error::ErrorKind;

    fn body(frames: &[&str]) -> HttpBodyStream {
        let chunks: Vec<Result<Vec<u8>, GatewayError>> =
            frames.iter().map(|frame| Ok(frame.as_bytes().to_vec())).collect();
        Box::pin(stream::iter(chunks))
    }

    #[tokio::test]
    async fn final_candidate_text_precedes_terminal() {
        let stream = create_stream(body(&[
            "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"Hel\"}]}}]}\r\n\r\n",
            "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"lo\"}]},\"finishReason\":\"STOP\"}],\"usageMetadata\":{\"totalTokenCount\":3}}\r\n\r\n",
        ]));
        let chunks: Vec<_> = stream.collect().await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].delta.as_deref(), Some("lo"));
        assert_eq!(chunks[2].finish_reason, Some(FinishReason::Stop));
    }

    #[tokio::test]
    async fn blocked_prompt_ends_stream_with_error() {
        let stream = create_stream(body(&[
            "data: {\"promptFeedback\":{\"blockReason\":\"PROHIBITED_CONTENT\"}}\n\n",
        ]));
        let chunks: Vec<_> = stream.collect().await;
        assert_eq!(chunks.len(), 1);
        let error = chunks[0].error.as_ref().unwrap();
        assert_eq!(error.kind, ErrorKind::UpstreamProtocol);
        assert!(error.message.contains("PROHIBITED_CONTENT"));
    }

    #[tokio::test]
    async fn close_without_finish_reason_is_protocol_error() {
        let stream = create_stream(body(&[
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"partial\"}]}}]}\n\n",
        ]));
        let chunks: Vec<_> = stream.collect().await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(
            chunks[1].error.as_ref().map(|e| e.kind),
            Some(ErrorKind::UpstreamProtocol)
        );
    }
}
