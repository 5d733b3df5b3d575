use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Future, Stream};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument};

use lexi_core::errors::GatewayError;
use lexi_core::provider::{LlmProvider, ModelEventStream, ModelRequest, StreamOptions};
use lexi_core::stream::ModelEvent;

use crate::converter;
use crate::sse;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const API_VERSION: &str = "2023-06-01";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const SSE_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug)]
pub struct AnthropicConfig {
    pub api_key: SecretString,
    pub model: String,
    pub base_url: String,
    pub idle_timeout: Duration,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::from(api_key.into()),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            idle_timeout: SSE_IDLE_TIMEOUT,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Streams responses from the Anthropic Messages API.
pub struct AnthropicProvider {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::NetworkError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'))
    }
}

fn map_send_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout(CONNECT_TIMEOUT)
    } else {
        GatewayError::NetworkError(e.to_string())
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    #[instrument(skip_all, fields(model = %self.config.model, messages = request.messages.len()))]
    async fn stream(
        &self,
        request: &ModelRequest,
        options: &StreamOptions,
    ) -> Result<ModelEventStream, GatewayError> {
        let body = converter::build_request_body(request, options, &self.config.model);

        let resp = self
            .client
            .post(self.messages_url())
            .header("x-api-key", self.config.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .header("accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::from_status_with_retry_after(
                status.as_u16(),
                body,
                retry_after.as_deref(),
            ));
        }

        debug!(status = status.as_u16(), "model stream opened");
        Ok(Box::pin(SseStream::with_idle_timeout(
            resp.bytes_stream(),
            self.config.idle_timeout,
        )))
    }
}

/// Wraps a byte stream from reqwest and yields ModelEvents.
/// If no data arrives within `idle_duration`, emits an error and ends.
struct SseStream {
    inner: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
    buffer: Vec<u8>,
    pending: VecDeque<ModelEvent>,
    idle_deadline: Pin<Box<tokio::time::Sleep>>,
    idle_duration: Duration,
    done: bool,
}

impl SseStream {
    fn with_idle_timeout(
        byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            buffer: Vec::new(),
            pending: VecDeque::new(),
            idle_deadline: Box::pin(tokio::time::sleep(idle_timeout)),
            idle_duration: idle_timeout,
            done: false,
        }
    }

    /// Parse every complete event currently in the buffer. Chunk boundaries
    /// may split UTF-8 sequences, so decoding waits for a full event.
    fn drain_complete_events(&mut self) {
        while let Some((pos, len)) = find_event_boundary(&self.buffer) {
            let chunk: Vec<u8> = self.buffer.drain(..pos + len).collect();
            self.parse_chunk(&chunk);
        }
    }

    fn parse_chunk(&mut self, chunk: &[u8]) {
        let text = String::from_utf8_lossy(chunk).replace("\r\n", "\n");
        for (event_type, data) in sse::parse_sse_lines(&text) {
            if let Some(event) = sse::parse_event(&event_type, &data) {
                self.pending.push_back(event);
            }
        }
    }

    fn next_pending(&mut self) -> Option<ModelEvent> {
        let event = self.pending.pop_front()?;
        if event.is_terminal() {
            self.done = true;
            self.pending.clear();
        }
        Some(event)
    }
}

/// Earliest blank line in the buffer, as (offset, separator length).
fn find_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n").map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

impl Stream for SseStream {
    type Item = ModelEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(event) = self.next_pending() {
            return Poll::Ready(Some(event));
        }
        if self.done {
            return Poll::Ready(None);
        }

        loop {
            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let new_deadline = tokio::time::Instant::now() + self.idle_duration;
                    self.idle_deadline.as_mut().reset(new_deadline);

                    self.buffer.extend_from_slice(&bytes);
                    self.drain_complete_events();

                    if let Some(event) = self.next_pending() {
                        return Poll::Ready(Some(event));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    self.done = true;
                    return Poll::Ready(Some(ModelEvent::Error {
                        error: GatewayError::StreamInterrupted(e.to_string()),
                    }));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    if !self.buffer.is_empty() {
                        let remaining = std::mem::take(&mut self.buffer);
                        self.parse_chunk(&remaining);
                    }
                    return Poll::Ready(self.next_pending());
                }
                Poll::Pending => {
                    if self.idle_deadline.as_mut().poll(cx).is_ready() {
                        self.done = true;
                        return Poll::Ready(Some(ModelEvent::Error {
                            error: GatewayError::StreamInterrupted(format!(
                                "idle timeout after {}s",
                                self.idle_duration.as_secs()
                            )),
                        }));
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}
