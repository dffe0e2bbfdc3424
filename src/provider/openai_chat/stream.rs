use std::collections::VecDeque;

use serde_json::Value;
use tracing::debug;

use crate::error::GatewayError;
use crate::http::HttpBodyStream;
use crate::provider::ChunkStream;
use crate::stream::{SseDecoder, SseEvent, StreamTranslator, TranslatedStream};
use crate::types::{FinishReason, StreamChunk};

use super::error::stream_error;
use super::provider::PROVIDER_NAME;
use super::response::convert_finish_reason;
use super::types::OpenAiStreamChunk;

pub(crate) fn create_stream(body: HttpBodyStream) -> ChunkStream {
    Box::pin(TranslatedStream::new(
        SseDecoder::new(body, PROVIDER_NAME),
        OpenAiStreamTranslator::default(),
    ))
}

/// Turns `choices[0].delta.content` frames into deltas; the terminal chunk is sent on
/// `[DONE]` with the last finish reason seen.
#[derive(Default)]
pub(crate) struct OpenAiStreamTranslator {
    finish_reason: Option<FinishReason>,
}

impl StreamTranslator for OpenAiStreamTranslator {
    type Frame = SseEvent;

    fn translate(
        &mut self,
        frame: SseEvent,
        out: &mut VecDeque<StreamChunk>,
    ) -> Result<(), GatewayError> {
        let data = match frame {
            SseEvent::Done => {
                out.push_back(StreamChunk::finish(
                    self.finish_reason.unwrap_or(FinishReason::Stop),
                ));
                return Ok(());
            }
            SseEvent::Message { data, .. } => data,
        };

        let value: Value = serde_json::from_str(&data).map_err(|err| {
            GatewayError::protocol(PROVIDER_NAME, format!("failed to parse stream chunk: {err}"))
        })?;
        if let Some(error) = value.get("error") {
            return Err(stream_error(error));
        }

        let chunk: OpenAiStreamChunk = serde_json::from_value(value).map_err(|err| {
            GatewayError::protocol(PROVIDER_NAME, format!("unexpected stream chunk: {err}"))
        })?;
        let Some(choice) = chunk.choices.into_iter().next() else {
            // usage-only trailer
            return Ok(());
        };

        if let Some(text) = choice.delta.and_then(|delta| delta.content) {
            if !text.is_empty() {
                out.push_back(StreamChunk::delta(text));
            }
        }
        if let Some(reason) = choice.finish_reason.as_deref() {
            debug!(reason, "openai stream finished");
            self.finish_reason = Some(convert_finish_reason(reason));
        }
        Ok(())
    }

    fn finish(&mut self) -> Option<StreamChunk> {
        self.finish_reason.map(StreamChunk::finish)
    }

    fn provider(&self) -> &'static str {
        PROVIDER_NAME
    }
}
