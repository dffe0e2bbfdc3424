use std::collections::VecDeque;

use futures_util::{StreamExt, stream};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::provider::ChunkStream;
use crate::stream::NdjsonDecoder;
use crate::types::{FinishReason, StreamChunk};

use super::error::stream_error;
use super::provider::{OllamaSession, PROVIDER_NAME};
use super::response::convert_finish_reason;
use super::types::{OllamaChatResponse, OllamaToolCall};

/// Streams NDJSON lines as chunks, pausing for a tool round when the model asks for
/// `web_search`.
pub(crate) fn create_stream(session: OllamaSession, decoder: NdjsonDecoder) -> ChunkStream {
    let state = StreamState {
        advertised: session.tools_advertised(),
        session,
        decoder: Some(decoder),
        pending: VecDeque::new(),
        round_content: String::new(),
        round_calls: Vec::new(),
        unrequested_tool_call: false,
        finished: false,
        first_line_deadline: None,
    };
    Box::pin(stream::unfold(state, |mut state| async move {
        let chunk = state.next_chunk().await?;
        Some((chunk, state))
    }))
}

struct StreamState {
    session: OllamaSession,
    /// Upstream body of the current round; `None` once released.
    decoder: Option<NdjsonDecoder>,
    pending: VecDeque<StreamChunk>,
    /// Whether the current round advertised the tool.
    advertised: bool,
    round_content: String,
    round_calls: Vec<OllamaToolCall>,
    unrequested_tool_call: bool,
    finished: bool,
    /// Set while a re-opened round has not produced its first line.
    first_line_deadline: Option<Instant>,
}

impl StreamState {
    async fn next_chunk(&mut self) -> Option<StreamChunk> {
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                if chunk.is_terminal() {
                    self.finished = true;
                    self.pending.clear();
                    self.decoder = None;
                }
                return Some(chunk);
            }
            if self.finished {
                return None;
            }

            let Some(decoder) = self.decoder.as_mut() else {
                self.fail(GatewayError::protocol(PROVIDER_NAME, "no upstream stream is open"));
                continue;
            };
            let line = match self.first_line_deadline.take() {
                Some(deadline) => match tokio::time::timeout_at(deadline, decoder.next()).await {
                    Ok(line) => line,
                    Err(_) => {
                        self.decoder = None;
                        self.fail(round_timeout());
                        continue;
                    }
                },
                None => decoder.next().await,
            };
            let tool_round_ready = match line {
                Some(Ok(line)) => self.handle_line(&line).unwrap_or_else(|err| {
                    self.fail(err);
                    false
                }),
                Some(Err(err)) => {
                    self.fail(err);
                    false
                }
                None if !self.round_calls.is_empty() => true,
                None => {
                    self.fail(GatewayError::protocol(
                        PROVIDER_NAME,
                        "upstream closed the stream before completion",
                    ));
                    false
                }
            };

            if tool_round_ready {
                self.resume_after_tools().await;
            }
        }
    }

    fn fail(&mut self, err: GatewayError) {
        self.pending.push_back(StreamChunk::failure(&err));
    }

    /// Returns `true` when the round ended with tool calls that must be executed.
    fn handle_line(&mut self, line: &str) -> Result<bool, GatewayError> {
        let frame: OllamaChatResponse = serde_json::from_str(line).map_err(|err| {
            GatewayError::protocol(PROVIDER_NAME, format!("failed to parse stream line: {err}"))
        })?;
        if let Some(error) = frame.error {
            return Err(stream_error(error));
        }

        if let Some(message) = frame.message {
            if self.advertised {
                self.round_calls.extend(message.tool_calls);
                self.round_content.push_str(&message.content);
            } else if !message.tool_calls.is_empty() {
                self.unrequested_tool_call = true;
            }
            if !message.content.is_empty() {
                self.pending.push_back(StreamChunk::delta(message.content));
            }
        }

        if frame.done {
            if !self.round_calls.is_empty() {
                return Ok(true);
            }
            let reason = if self.unrequested_tool_call {
                FinishReason::ToolCall
            } else {
                convert_finish_reason(frame.done_reason.as_deref())
            };
            self.pending.push_back(StreamChunk::finish(reason));
        }
        Ok(false)
    }

    async fn resume_after_tools(&mut self) {
        // the first round's connection is no longer needed
        self.decoder = None;
        let calls = std::mem::take(&mut self.round_calls);
        let content = std::mem::take(&mut self.round_content);
        debug!(calls = calls.len(), "stream paused for tool round");

        self.session.run_tool_round(content, calls).await;
        self.advertised = self.session.tools_advertised();

        let Some(budget) = self.session.timeout() else {
            match self.session.open_stream().await {
                Ok(decoder) => self.decoder = Some(decoder),
                Err(err) => self.fail(err),
            }
            return;
        };
        let deadline = Instant::now() + budget;
        match tokio::time::timeout_at(deadline, self.session.open_stream()).await {
            Ok(Ok(decoder)) => {
                self.decoder = Some(decoder);
                self.first_line_deadline = Some(deadline);
            }
            Ok(Err(err)) => self.fail(err),
            Err(_) => self.fail(round_timeout()),
        }
    }
}

fn round_timeout() -> GatewayError {
    warn!("follow-up round produced no output before the deadline");
    GatewayError::timeout("ollama did not answer the follow-up round in time")
}
