//! Incremental decoders for upstream streaming bodies.
//!
//! [`SseDecoder`] and [`NdjsonDecoder`] turn raw byte chunks into frames, and
//! [`TranslatedStream`] drives a provider-specific [`StreamTranslator`] over those frames
//! while enforcing the terminal-chunk contract.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;

use crate::error::GatewayError;
use crate::http::HttpBodyStream;
use crate::types::StreamChunk;

/// Decoded Server-Sent-Events frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// One event: the optional `event:` name and the joined `data:` payload.
    Message { event: Option<String>, data: String },
    /// Terminal marker reported via `data: [DONE]`.
    Done,
}

impl SseEvent {
    fn message(event: Option<String>, data: String) -> Self {
        Self::Message { event, data }
    }
}

fn drain_line(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    buffer.iter().position(|b| *b == b'\n').map(|pos| {
        let mut line: Vec<u8> = buffer.drain(..=pos).collect();
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        line
    })
}

fn strip_field(line: &[u8], prefix: &[u8]) -> Option<Vec<u8>> {
    line.strip_prefix(prefix).map(|rest| {
        let mut value = rest.to_vec();
        if value.first() == Some(&b' ') {
            value.remove(0);
        }
        value
    })
}

/// Normalizes an SSE body into [`SseEvent`] values.
pub struct SseDecoder {
    body: HttpBodyStream,
    buffer: Vec<u8>,
    event_name: Option<String>,
    data_lines: Vec<Vec<u8>>,
    pending: VecDeque<Result<SseEvent, GatewayError>>,
    provider: &'static str,
    stream_closed: bool,
    done_received: bool,
}

impl SseDecoder {
    /// Wraps a raw HTTP body stream and prepares it for SSE decoding.
    pub fn new(body: HttpBodyStream, provider: &'static str) -> Self {
        Self {
            body,
            buffer: Vec::new(),
            event_name: None,
            data_lines: Vec::new(),
            pending: VecDeque::new(),
            provider,
            stream_closed: false,
            done_received: false,
        }
    }

    fn handle_line(&mut self, line: Vec<u8>) {
        if let Some(data) = strip_field(&line, b"data:") {
            self.data_lines.push(data);
        } else if let Some(name) = strip_field(&line, b"event:") {
            self.event_name = Some(String::from_utf8_lossy(&name).trim().to_string());
        }
        // `id:`, `retry:` and `:` comment lines carry nothing the adapters need.
    }

    fn flush_event(&mut self) -> Result<(), GatewayError> {
        let event_name = self.event_name.take();
        if self.data_lines.is_empty() {
            return Ok(());
        }

        let mut joined = Vec::new();
        for (idx, mut segment) in self.data_lines.drain(..).enumerate() {
            if idx > 0 {
                joined.push(b'\n');
            }
            joined.append(&mut segment);
        }

        if joined.is_empty() {
            return Ok(());
        }

        let data = String::from_utf8(joined).map_err(|err| {
            GatewayError::protocol(self.provider, format!("invalid UTF-8 in stream chunk: {err}"))
        })?;

        if data.trim() == "[DONE]" {
            if !self.done_received {
                self.done_received = true;
                self.pending.push_back(Ok(SseEvent::Done));
            }
        } else {
            self.pending.push_back(Ok(SseEvent::message(event_name, data)));
        }

        Ok(())
    }
}

impl Stream for SseDecoder {
    type Item = Result<SseEvent, GatewayError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(event) = this.pending.pop_front() {
            return Poll::Ready(Some(event));
        }

        if this.done_received {
            return Poll::Ready(None);
        }

        loop {
            if this.stream_closed {
                if !this.buffer.is_empty() {
                    let line = std::mem::take(&mut this.buffer);
                    this.handle_line(line);
                }
                if let Err(err) = this.flush_event() {
                    return Poll::Ready(Some(Err(err)));
                }
                return Poll::Ready(this.pending.pop_front());
            }

            match this.body.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.buffer.extend_from_slice(&bytes);
                    while let Some(line) = drain_line(&mut this.buffer) {
                        if line.is_empty() {
                            if let Err(err) = this.flush_event() {
                                return Poll::Ready(Some(Err(err)));
                            }
                        } else {
                            this.handle_line(line);
                        }
                    }
                    if let Some(event) = this.pending.pop_front() {
                        return Poll::Ready(Some(event));
                    }
                }
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Some(Err(err))),
                Poll::Ready(None) => {
                    this.stream_closed = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Splits a newline-delimited JSON body into one line per item.
pub struct NdjsonDecoder {
    body: HttpBodyStream,
    buffer: Vec<u8>,
    pending: VecDeque<String>,
    provider: &'static str,
    stream_closed: bool,
}

impl NdjsonDecoder {
    pub fn new(body: HttpBodyStream, provider: &'static str) -> Self {
        Self {
            body,
            buffer: Vec::new(),
            pending: VecDeque::new(),
            provider,
            stream_closed: false,
        }
    }

    fn push_line(&mut self, line: Vec<u8>) -> Result<(), GatewayError> {
        let text = String::from_utf8(line).map_err(|err| {
            GatewayError::protocol(self.provider, format!("invalid UTF-8 in stream line: {err}"))
        })?;
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            self.pending.push_back(trimmed.to_string());
        }
        Ok(())
    }
}

impl Stream for NdjsonDecoder {
    type Item = Result<String, GatewayError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(line) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(line)));
            }

            if this.stream_closed {
                if this.buffer.is_empty() {
                    return Poll::Ready(None);
                }
                let rest = std::mem::take(&mut this.buffer);
                if let Err(err) = this.push_line(rest) {
                    return Poll::Ready(Some(Err(err)));
                }
                continue;
            }

            match this.body.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.buffer.extend_from_slice(&bytes);
                    while let Some(line) = drain_line(&mut this.buffer) {
                        if let Err(err) = this.push_line(line) {
                            return Poll::Ready(Some(Err(err)));
                        }
                    }
                }
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Some(Err(err))),
                Poll::Ready(None) => this.stream_closed = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Converts provider-native frames into normalized chunks.
pub(crate) trait StreamTranslator: Send + Unpin {
    type Frame;

    /// Translates one frame, appending zero or more chunks to `out`.
    ///
    /// Pushing a terminal chunk ends the stream; anything queued after it is discarded.
    fn translate(
        &mut self,
        frame: Self::Frame,
        out: &mut VecDeque<StreamChunk>,
    ) -> Result<(), GatewayError>;

    /// Called when the upstream closes. Returns the terminal chunk if the provider had
    /// signalled completion without an explicit end-of-stream frame.
    fn finish(&mut self) -> Option<StreamChunk>;

    fn provider(&self) -> &'static str;
}

/// Drives a frame decoder through a [`StreamTranslator`].
///
/// Guarantees exactly one terminal chunk: translation errors, decoder errors and an
/// upstream that closes without completing all become a terminal error chunk. The frame
/// source, and with it the upstream connection, is dropped as soon as the terminal
/// chunk is queued.
pub(crate) struct TranslatedStream<S, T> {
    frames: Option<S>,
    translator: T,
    pending: VecDeque<StreamChunk>,
    terminated: bool,
}

impl<S, T> TranslatedStream<S, T>
where
    T: StreamTranslator,
    S: Stream<Item = Result<T::Frame, GatewayError>> + Send + Unpin,
{
    pub(crate) fn new(frames: S, translator: T) -> Self {
        Self {
            frames: Some(frames),
            translator,
            pending: VecDeque::new(),
            terminated: false,
        }
    }
}

impl<S, T> Stream for TranslatedStream<S, T>
where
    T: StreamTranslator,
    S: Stream<Item = Result<T::Frame, GatewayError>> + Send + Unpin,
{
    type Item = StreamChunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(chunk) = this.pending.pop_front() {
                if chunk.is_terminal() {
                    this.terminated = true;
                    this.pending.clear();
                    this.frames = None;
                }
                return Poll::Ready(Some(chunk));
            }

            if this.terminated {
                return Poll::Ready(None);
            }

            let Some(frames) = this.frames.as_mut() else {
                return Poll::Ready(None);
            };

            match Pin::new(frames).poll_next(cx) {
                Poll::Ready(Some(Ok(frame))) => {
                    if let Err(err) = this.translator.translate(frame, &mut this.pending) {
                        this.pending.push_back(StreamChunk::failure(&err));
                    }
                }
                Poll::Ready(Some(Err(err))) => {
                    this.pending.push_back(StreamChunk::failure(&err));
                }
                Poll::Ready(None) => {
                    this.frames = None;
                    let terminal = this.translator.finish().unwrap_or_else(|| {
                        StreamChunk::failure(&GatewayError::protocol(
                            this.translator.provider(),
                            "upstream closed the stream before completion",
                        ))
                    });
                    this.pending.push_back(terminal);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
