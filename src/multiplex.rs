//! OpenAI-compatible wire shape shared by every provider's stream.
//!
//! Each [`StreamChunk`] becomes one `data: {"choices":[{"delta":{...},"finish_reason":...}]}`
//! server-sent event, and the sequence always closes with a single `data: [DONE]` frame.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::error::GatewayError;
use crate::types::{ErrorPayload, FinishReason, StreamChunk};

/// Terminator sent once after the terminal chunk.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedChunk {
    pub choices: Vec<NormalizedChoice>,
    /// Present only on error terminals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedChoice {
    pub delta: NormalizedDelta,
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl From<&StreamChunk> for NormalizedChunk {
    fn from(chunk: &StreamChunk) -> Self {
        let finish_reason = if chunk.error.is_some() {
            Some(FinishReason::Error)
        } else {
            chunk.finish_reason
        };
        Self {
            choices: vec![NormalizedChoice {
                delta: NormalizedDelta {
                    content: chunk.delta.clone(),
                },
                finish_reason,
            }],
            error: chunk.error.clone(),
        }
    }
}

/// Serializes one chunk as its JSON wire object.
pub fn encode_chunk(chunk: &StreamChunk) -> String {
    match serde_json::to_string(&NormalizedChunk::from(chunk)) {
        Ok(encoded) => encoded,
        Err(err) => {
            warn!(error = %err, "failed to encode stream chunk");
            json!({
                "choices": [{"delta": {}, "finish_reason": "error"}],
                "error": {"kind": "upstream_protocol_error", "message": err.to_string()},
            })
            .to_string()
        }
    }
}

/// Wraps a chunk in an SSE `data:` frame.
///
/// # Examples
///
/// ```
/// use llm_gateway::multiplex::sse_frame;
/// use llm_gateway::types::StreamChunk;
///
/// let frame = sse_frame(&StreamChunk::delta("Hi"));
/// assert_eq!(frame, "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"},\"finish_reason\":null}]}\n\n");
/// ```
pub fn sse_frame(chunk: &StreamChunk) -> String {
    format!("data: {}\n\n", encode_chunk(chunk))
}

/// Turns a chunk stream into SSE text frames.
///
/// Yields one frame per chunk, then exactly one [`DONE_FRAME`]. If the inner stream
/// ends without a terminal chunk an error terminal is synthesized first. The inner
/// stream is dropped as soon as its terminal chunk is seen, and dropping `SseFrames`
/// drops it too, closing the upstream connection.
pub struct SseFrames<S> {
    inner: Option<S>,
    done: DoneState,
}

#[derive(Clone, Copy, PartialEq)]
enum DoneState {
    Streaming,
    Pending,
    Sent,
}

impl<S> SseFrames<S>
where
    S: Stream<Item = StreamChunk> + Unpin,
{
    pub fn new(inner: S) -> Self {
        Self {
            inner: Some(inner),
            done: DoneState::Streaming,
        }
    }
}

impl<S> Stream for SseFrames<S>
where
    S: Stream<Item = StreamChunk> + Unpin,
{
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.done {
            DoneState::Sent => return Poll::Ready(None),
            DoneState::Pending => {
                self.done = DoneState::Sent;
                return Poll::Ready(Some(DONE_FRAME.to_string()));
            }
            DoneState::Streaming => {}
        }

        let Some(inner) = self.inner.as_mut() else {
            self.done = DoneState::Sent;
            return Poll::Ready(Some(DONE_FRAME.to_string()));
        };
        match Pin::new(inner).poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(chunk)) => {
                if chunk.is_terminal() {
                    self.inner = None;
                    self.done = DoneState::Pending;
                }
                Poll::Ready(Some(sse_frame(&chunk)))
            }
            Poll::Ready(None) => {
                self.inner = None;
                self.done = DoneState::Pending;
                let err = GatewayError::protocol("gateway", "stream ended without a terminal chunk");
                Poll::Ready(Some(sse_frame(&StreamChunk::failure(&err))))
            }
        }
    }
}
