//! Scripted in-memory transport shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::{StreamExt, stream};
use llm_gateway::error::GatewayError;
use llm_gateway::http::{HttpBodyStream, HttpRequest, HttpResponse, HttpStreamResponse, HttpTransport};
use llm_gateway::search::{SearchProvider, SearchQuery, SearchResult};
use serde_json::Value;

/// One scripted upstream answer.
pub struct Reply {
    status: u16,
    headers: HashMap<String, String>,
    chunks: Vec<Vec<u8>>,
    first_delay: Duration,
    frame_delay: Duration,
    hold_open: bool,
}

impl Reply {
    fn new(status: u16, chunks: Vec<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            chunks,
            first_delay: Duration::ZERO,
            frame_delay: Duration::ZERO,
            hold_open: false,
        }
    }

    pub fn json(status: u16, body: Value) -> Self {
        Self::new(status, vec![body.to_string().into_bytes()])
    }

    /// Each frame is delivered as its own body chunk, verbatim.
    pub fn raw(frames: &[&str]) -> Self {
        Self::new(200, frames.iter().map(|frame| frame.as_bytes().to_vec()).collect())
    }

    /// `data: <json>` events without an event name.
    pub fn sse(events: &[Value]) -> Self {
        Self::new(
            200,
            events
                .iter()
                .map(|event| format!("data: {event}\n\n").into_bytes())
                .collect(),
        )
    }

    pub fn ndjson(lines: &[Value]) -> Self {
        Self::new(
            200,
            lines.iter().map(|line| format!("{line}\n").into_bytes()).collect(),
        )
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_first_delay(mut self, delay: Duration) -> Self {
        self.first_delay = delay;
        self
    }

    pub fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = delay;
        self
    }

    /// Keeps the body open after the last frame, like a stalled upstream.
    pub fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    fn into_body(self) -> HttpBodyStream {
        let Reply {
            chunks,
            first_delay,
            frame_delay,
            hold_open,
            ..
        } = self;
        let frames = stream::unfold((chunks.into_iter(), true), move |(mut chunks, first)| async move {
            let chunk = chunks.next()?;
            let delay = if first { first_delay } else { frame_delay };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Some((Ok::<_, GatewayError>(chunk), (chunks, false)))
        });
        if hold_open {
            Box::pin(frames.chain(stream::pending()))
        } else {
            Box::pin(frames)
        }
    }
}

/// Transport that answers from a script and records every request.
#[derive(Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<HttpRequest>>,
    opened: Arc<AtomicUsize>,
    dropped: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new(script: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request_json(&self, index: usize) -> Value {
        self.requests()[index].json_body().expect("recorded body is JSON")
    }

    /// Streaming bodies handed out that have not been dropped yet.
    pub fn open_bodies(&self) -> usize {
        self.opened.load(Ordering::SeqCst) - self.dropped.load(Ordering::SeqCst)
    }

    fn next_reply(&self, request: HttpRequest) -> Result<Reply, GatewayError> {
        self.requests.lock().unwrap().push(request);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| GatewayError::protocol("mock", "no scripted reply left"))
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, GatewayError> {
        let reply = self.next_reply(request)?;
        if !reply.first_delay.is_zero() {
            tokio::time::sleep(reply.first_delay).await;
        }
        Ok(HttpResponse {
            status: reply.status,
            headers: reply.headers,
            body: reply.chunks.concat(),
        })
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, GatewayError> {
        let reply = self.next_reply(request)?;
        let status = reply.status;
        let headers = reply.headers.clone();
        self.opened.fetch_add(1, Ordering::SeqCst);
        let body = ObservedBody {
            inner: reply.into_body(),
            dropped: self.dropped.clone(),
        };
        Ok(HttpStreamResponse {
            status,
            headers,
            body: Box::pin(body),
        })
    }
}

/// Counts drops so tests can tell when a connection was released.
struct ObservedBody {
    inner: HttpBodyStream,
    dropped: Arc<AtomicUsize>,
}

impl Stream for ObservedBody {
    type Item = Result<Vec<u8>, GatewayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl Drop for ObservedBody {
    fn drop(&mut self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

/// Search collaborator returning fixed results, or failing.
pub struct FixedSearch {
    pub results: Vec<SearchResult>,
    pub fail: bool,
    pub queries: Mutex<Vec<SearchQuery>>,
}

impl FixedSearch {
    pub fn with_results(results: Vec<SearchResult>) -> Arc<Self> {
        Arc::new(Self {
            results,
            fail: false,
            queries: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            results: Vec::new(),
            fail: true,
            queries: Mutex::new(Vec::new()),
        })
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

#[async_trait]
impl SearchProvider for FixedSearch {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, GatewayError> {
        self.queries.lock().unwrap().push(query.clone());
        if self.fail {
            return Err(GatewayError::SearchUnavailable {
                message: "search backend returned 503".to_string(),
            });
        }
        Ok(self.results.clone())
    }
}

pub fn search_result(title: &str, url: &str, snippet: &str) -> SearchResult {
    SearchResult {
        title: title.to_string(),
        url: url.to_string(),
        snippet: snippet.to_string(),
        published_date: None,
    }
}
