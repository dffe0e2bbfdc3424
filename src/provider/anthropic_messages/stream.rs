use std::collections::VecDeque;

use serde_json::Value;
use tracing::debug;

use crate::error::GatewayError;
use crate::http::HttpBodyStream;
use crate::provider::ChunkStream;
use crate::provider::retry::retry_after_from_payload;
use crate::stream::{SseDecoder, SseEvent, StreamTranslator, TranslatedStream};
use crate::types::{FinishReason, StreamChunk};

use super::error::stream_error;
use super::provider::PROVIDER_NAME;
use super::response::convert_finish_reason;
use super::types::AnthropicStreamEvent;

pub(crate) fn create_stream(body: HttpBodyStream) -> ChunkStream {
    Box::pin(TranslatedStream::new(
        SseDecoder::new(body, PROVIDER_NAME),
        AnthropicStreamTranslator::default(),
    ))
}

#[derive(Default)]
pub(crate) struct AnthropicStreamTranslator {
    stop_reason: Option<FinishReason>,
}

impl StreamTranslator for AnthropicStreamTranslator {
    type Frame = SseEvent;

    fn translate(
        &mut self,
        frame: SseEvent,
        out: &mut VecDeque<StreamChunk>,
    ) -> Result<(), GatewayError> {
        let (event_name, data) = match frame {
            SseEvent::Done => {
                out.push_back(StreamChunk::finish(
                    self.stop_reason.unwrap_or(FinishReason::Stop),
                ));
                return Ok(());
            }
            SseEvent::Message { event, data } => (event, data),
        };

        let value: Value = serde_json::from_str(&data).map_err(|err| {
            GatewayError::protocol(PROVIDER_NAME, format!("failed to parse stream event: {err}"))
        })?;
        let retry_after = value.get("error").and_then(retry_after_from_payload);
        let event: AnthropicStreamEvent = serde_json::from_value(value).map_err(|err| {
            GatewayError::protocol(
                PROVIDER_NAME,
                format!(
                    "unexpected {} event: {err}",
                    event_name.as_deref().unwrap_or("unnamed")
                ),
            )
        })?;

        match event {
            AnthropicStreamEvent::ContentBlockDelta { delta } => {
                let is_text = delta.kind.as_deref().is_none_or(|kind| kind == "text_delta");
                if let (true, Some(text)) = (is_text, delta.text) {
                    if !text.is_empty() {
                        out.push_back(StreamChunk::delta(text));
                    }
                }
            }
            AnthropicStreamEvent::MessageDelta { delta } => {
                if let Some(reason) = delta.stop_reason.as_deref() {
                    self.stop_reason = Some(convert_finish_reason(reason));
                }
            }
            AnthropicStreamEvent::MessageStop => {
                out.push_back(StreamChunk::finish(
                    self.stop_reason.unwrap_or(FinishReason::Stop),
                ));
            }
            AnthropicStreamEvent::Error { error } => return Err(stream_error(&error, retry_after)),
            AnthropicStreamEvent::MessageStart
            | AnthropicStreamEvent::ContentBlockStart
            | AnthropicStreamEvent::ContentBlockStop
            | AnthropicStreamEvent::Ping
            | AnthropicStreamEvent::Unknown => {
                debug!(event = event_name.as_deref(), "skipping anthropic event");
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Option<StreamChunk> {
        self.stop_reason.map(StreamChunk::finish)
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
    async fn named_events_produce_deltas_and_stop_reason() {
        let stream = create_stream(body(&[
            "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"m\"}}\n\n",
            "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
            "event: ping\ndata: {\"type\":\"ping\"}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n\n",
            "event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
            "event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"max_tokens\"},\"usage\":{\"output_tokens\":1}}\n\n",
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
        ]));
        let chunks: Vec<_> = stream.collect().await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].delta.as_deref(), Some("Hi"));
        assert_eq!(chunks[1].finish_reason, Some(FinishReason::Length));
    }

    #[tokio::test]
    async fn error_event_is_classified() {
        let stream = create_stream(body(&[
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"a\"}}\n\n",
            "event: error\ndata: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n",
        ]));
        let chunks: Vec<_> = stream.collect().await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(
            chunks[1].error.as_ref().map(|e| e.kind),
            Some(ErrorKind::UpstreamRateLimit)
        );
    }

    #[tokio::test]
    async fn tool_input_deltas_are_not_text() {
        let stream = create_stream(body(&[
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{}\"}}\n\n",
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
        ]));
        let chunks: Vec<_> = stream.collect().await;
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_terminal());
    }
}
