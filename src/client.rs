use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{StreamExt, stream};
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::provider::{ChunkStream, LLMProvider, ProviderAdapter};
use crate::types::{ChatRequest, ChatResponse, ProviderKind, StreamChunk};

/// Wall-clock budget applied when the configuration does not set one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Single entry point for buffered and streaming generation. Immutable once built.
pub struct ChatService {
    adapters: HashMap<ProviderKind, Arc<ProviderAdapter>>,
    default_provider: ProviderKind,
    request_timeout: Duration,
}

impl fmt::Debug for ChatService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatService")
            .field("providers", &self.providers())
            .field("default_provider", &self.default_provider)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl ChatService {
    pub fn builder() -> ChatServiceBuilder {
        ChatServiceBuilder {
            adapters: HashMap::new(),
            default_provider: ProviderKind::OpenAi,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Returns the adapter for `provider`, or for the default provider when `None`.
    /// Hosted providers configured without a credential are never registered.
    pub fn resolve(&self, provider: Option<ProviderKind>) -> Result<Arc<ProviderAdapter>, GatewayError> {
        let kind = provider.unwrap_or(self.default_provider);
        self.adapters
            .get(&kind)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownProvider {
                provider: kind.to_string(),
                message: "no adapter or credential is configured for this provider".to_string(),
            })
    }

    pub fn providers(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|kind| self.adapters.contains_key(kind))
            .collect()
    }

    pub fn default_provider(&self) -> ProviderKind {
        self.default_provider
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub async fn generate(&self, request: &ChatRequest) -> Result<ChatResponse, GatewayError> {
        request.validate()?;
        let adapter = self.resolve(request.provider)?;
        info!(
            provider = adapter.name(),
            messages = request.messages.len(),
            stream = false,
            "generation started"
        );

        let result = match tokio::time::timeout(self.request_timeout, adapter.generate(request)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::timeout(format!(
                "{} did not respond within {}s",
                adapter.name(),
                self.request_timeout.as_secs_f64()
            ))),
        };
        if let Err(err) = &result {
            warn!(provider = adapter.name(), kind = %err.kind(), error = %err, "generation failed");
        }
        result
    }

    /// Streaming generation.
    ///
    /// The returned stream never fails as a whole: validation, resolution, connection
    /// and upstream errors all arrive as its single terminal chunk. The timeout covers
    /// opening the upstream and receiving the first chunk only. Dropping the stream
    /// releases the upstream connection.
    pub fn generate_stream(&self, request: &ChatRequest) -> ChunkStream {
        let adapter = match request
            .validate()
            .and_then(|()| self.resolve(request.provider))
        {
            Ok(adapter) => adapter,
            Err(err) => {
                warn!(kind = %err.kind(), error = %err, "stream rejected");
                return Box::pin(stream::iter([StreamChunk::failure(&err)]));
            }
        };
        info!(
            provider = adapter.name(),
            messages = request.messages.len(),
            stream = true,
            "generation started"
        );

        let phase = StreamPhase::Opening {
            adapter,
            request: request.clone(),
            timeout: self.request_timeout,
        };
        Box::pin(stream::unfold(phase, |phase| async move {
            match phase {
                StreamPhase::Opening {
                    adapter,
                    request,
                    timeout,
                } => Some(open_first_chunk(adapter, request, timeout).await),
                StreamPhase::Streaming { provider, mut inner } => Some(match inner.next().await {
                    Some(chunk) => advance(provider, chunk, inner),
                    None => (missing_terminal(provider), StreamPhase::Finished),
                }),
                StreamPhase::Finished => None,
            }
        }))
    }
}

enum StreamPhase {
    Opening {
        adapter: Arc<ProviderAdapter>,
        request: ChatRequest,
        timeout: Duration,
    },
    Streaming {
        provider: &'static str,
        inner: ChunkStream,
    },
    Finished,
}

async fn open_first_chunk(
    adapter: Arc<ProviderAdapter>,
    request: ChatRequest,
    timeout: Duration,
) -> (StreamChunk, StreamPhase) {
    let provider = adapter.name();
    let opened = tokio::time::timeout(timeout, async {
        let mut inner = adapter.generate_stream(&request).await?;
        let first = inner.next().await;
        Ok::<_, GatewayError>((inner, first))
    })
    .await;

    match opened {
        Ok(Ok((inner, Some(chunk)))) => {
            debug!(provider, "first chunk received");
            advance(provider, chunk, inner)
        }
        Ok(Ok((_, None))) => (missing_terminal(provider), StreamPhase::Finished),
        Ok(Err(err)) => {
            warn!(provider, kind = %err.kind(), error = %err, "stream failed to open");
            (StreamChunk::failure(&err), StreamPhase::Finished)
        }
        Err(_) => {
            let err = GatewayError::timeout(format!(
                "{provider} produced no output within {}s",
                timeout.as_secs_f64()
            ));
            warn!(provider, error = %err, "stream timed out before first chunk");
            (StreamChunk::failure(&err), StreamPhase::Finished)
        }
    }
}

fn advance(provider: &'static str, chunk: StreamChunk, inner: ChunkStream) -> (StreamChunk, StreamPhase) {
    if chunk.is_terminal() {
        if let Some(error) = &chunk.error {
            warn!(provider, kind = %error.kind, message = %error.message, "stream ended with error");
        }
        (chunk, StreamPhase::Finished)
    } else {
        (chunk, StreamPhase::Streaming { provider, inner })
    }
}

fn missing_terminal(provider: &'static str) -> StreamChunk {
    StreamChunk::failure(&GatewayError::protocol(
        provider,
        "stream ended without a terminal chunk",
    ))
}

pub struct ChatServiceBuilder {
    adapters: HashMap<ProviderKind, Arc<ProviderAdapter>>,
    default_provider: ProviderKind,
    request_timeout: Duration,
}

impl ChatServiceBuilder {
    pub fn register(mut self, adapter: impl Into<ProviderAdapter>) -> Self {
        let adapter = adapter.into();
        self.adapters.insert(adapter.kind(), Arc::new(adapter));
        self
    }

    pub fn default_provider(mut self, provider: ProviderKind) -> Self {
        self.default_provider = provider;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn build(self) -> ChatService {
        ChatService {
            adapters: self.adapters,
            default_provider: self.default_provider,
            request_timeout: self.request_timeout,
        }
    }
}
