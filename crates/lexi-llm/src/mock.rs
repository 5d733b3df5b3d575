use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt as _;
use parking_lot::Mutex;
use serde_json::Value;

use lexi_core::errors::GatewayError;
use lexi_core::ids::ToolUseId;
use lexi_core::messages::StopReason;
use lexi_core::provider::{LlmProvider, ModelEventStream, ModelRequest, StreamOptions};
use lexi_core::stream::{BlockDelta, BlockStart, ModelEvent, TokenUsage};

/// Pre-programmed responses for deterministic tests without API calls.
pub enum MockResponse {
    /// Yield these events from the stream.
    Events(Vec<ModelEvent>),
    /// Fail the `stream()` call itself.
    Error(GatewayError),
    /// Wait, then resolve the inner response.
    Delay(Duration, Box<MockResponse>),
    /// Yield the events, then never finish.
    Hang(Vec<ModelEvent>),
}

impl MockResponse {
    /// A single text block ending the turn.
    pub fn text(text: &str) -> Self {
        let mut events = vec![start()];
        push_text_block(&mut events, 0, text);
        events.extend(finish(StopReason::EndTurn));
        Self::Events(events)
    }

    /// Optional leading text, then one tool_use block per call. Each input is
    /// streamed in two fragments, like the real API splits partial JSON.
    pub fn tool_uses(text: Option<&str>, calls: Vec<(&str, &str, Value)>) -> Self {
        let mut events = vec![start()];
        let mut index = 0;
        if let Some(text) = text {
            push_text_block(&mut events, index, text);
            index += 1;
        }
        for (id, name, input) in calls {
            let json = input.to_string();
            let mid = json.char_indices().nth(json.chars().count() / 2).map_or(0, |(i, _)| i);
            events.push(ModelEvent::BlockStart {
                index,
                block: BlockStart::ToolUse {
                    id: ToolUseId::from_raw(id),
                    name: name.to_string(),
                },
            });
            events.push(ModelEvent::BlockDelta {
                index,
                delta: BlockDelta::InputJson(json[..mid].to_string()),
            });
            events.push(ModelEvent::BlockDelta {
                index,
                delta: BlockDelta::InputJson(json[mid..].to_string()),
            });
            events.push(ModelEvent::BlockStop { index });
            index += 1;
        }
        events.extend(finish(StopReason::ToolUse));
        Self::Events(events)
    }

    /// Text that starts streaming, then an upstream error.
    pub fn text_then_error(text: &str, error: GatewayError) -> Self {
        Self::Events(vec![
            start(),
            ModelEvent::BlockStart {
                index: 0,
                block: BlockStart::Text,
            },
            ModelEvent::BlockDelta {
                index: 0,
                delta: BlockDelta::Text(text.to_string()),
            },
            ModelEvent::Error { error },
        ])
    }

    /// Text that starts streaming and then stalls forever.
    pub fn text_then_hang(text: &str) -> Self {
        Self::Hang(vec![
            start(),
            ModelEvent::BlockStart {
                index: 0,
                block: BlockStart::Text,
            },
            ModelEvent::BlockDelta {
                index: 0,
                delta: BlockDelta::Text(text.to_string()),
            },
        ])
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

fn start() -> ModelEvent {
    ModelEvent::MessageStart {
        usage: TokenUsage {
            input_tokens: 10,
            output_tokens: 1,
        },
    }
}

fn push_text_block(events: &mut Vec<ModelEvent>, index: usize, text: &str) {
    events.push(ModelEvent::BlockStart {
        index,
        block: BlockStart::Text,
    });
    events.push(ModelEvent::BlockDelta {
        index,
        delta: BlockDelta::Text(text.to_string()),
    });
    events.push(ModelEvent::BlockStop { index });
}

fn finish(stop_reason: StopReason) -> [ModelEvent; 2] {
    [
        ModelEvent::MessageDelta {
            stop_reason: Some(stop_reason),
            usage: TokenUsage {
                input_tokens: 0,
                output_tokens: 5,
            },
        },
        ModelEvent::MessageStop,
    ]
}

/// Replays responses in order and records every request it receives.
pub struct MockProvider {
    responses: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<ModelRequest>>,
    call_count: AtomicUsize,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn stream(
        &self,
        request: &ModelRequest,
        _options: &StreamOptions,
    ) -> Result<ModelEventStream, GatewayError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());

        let next = self.responses.lock().pop_front();
        let Some(mut response) = next else {
            return Err(GatewayError::InvalidRequest(format!(
                "MockProvider: no response configured for call {idx}"
            )));
        };

        loop {
            match response {
                MockResponse::Events(events) => return Ok(Box::pin(stream::iter(events))),
                MockResponse::Hang(events) => {
                    return Ok(Box::pin(stream::iter(events).chain(stream::pending())))
                }
                MockResponse::Error(e) => return Err(e),
                MockResponse::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    response = *inner;
                }
            }
        }
    }
}
