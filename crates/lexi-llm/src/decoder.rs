//! Turns a raw model event stream into content blocks.
//!
//! Text deltas are forwarded as they arrive. Tool-use input arrives as JSON
//! fragments which are buffered per block and parsed once the block closes;
//! a payload that does not parse to an object becomes `{}` so a garbled
//! stream never aborts the turn.

use futures::{Stream, StreamExt};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use lexi_core::errors::GatewayError;
use lexi_core::ids::ToolUseId;
use lexi_core::messages::{ContentBlock, StopReason, ToolCall};
use lexi_core::provider::ModelEventStream;
use lexi_core::stream::{BlockDelta, BlockStart, ModelEvent, TokenUsage};

#[derive(Clone, Debug, PartialEq)]
pub enum DecodedEvent {
    TextDelta(String),
    ToolUseStarted { id: ToolUseId, name: String },
    ToolUseReady(ToolCall),
    Finished(DecodedRound),
}

/// The assembled result of one model response.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecodedRound {
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<StopReason>,
    pub usage: TokenUsage,
}

impl DecodedRound {
    pub fn stop_reason(&self) -> StopReason {
        self.stop_reason.clone().unwrap_or(StopReason::EndTurn)
    }

    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.content.iter().filter_map(ContentBlock::as_tool_call).collect()
    }

    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn requests_tools(&self) -> bool {
        self.stop_reason() == StopReason::ToolUse && self.content.iter().any(ContentBlock::is_tool_use)
    }
}

/// Block currently receiving deltas. At most one is open at a time.
enum OpenBlock {
    Text {
        index: usize,
        text: String,
    },
    ToolUse {
        index: usize,
        id: ToolUseId,
        name: String,
        buffer: String,
    },
    Skipped {
        index: usize,
    },
}

impl OpenBlock {
    fn index(&self) -> usize {
        match self {
            Self::Text { index, .. } | Self::ToolUse { index, .. } | Self::Skipped { index } => *index,
        }
    }
}

/// Incremental decoder state for one model response.
#[derive(Default)]
pub struct EventDecoder {
    open: Option<OpenBlock>,
    content: Vec<ContentBlock>,
    stop_reason: Option<StopReason>,
    usage: TokenUsage,
    finished: bool,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed one event. Returns the decoded events it produced, or the
    /// upstream error if the event reports one.
    pub fn feed(&mut self, event: ModelEvent) -> Result<Vec<DecodedEvent>, GatewayError> {
        let mut out = Vec::new();
        if self.finished {
            debug!(?event, "event after message_stop ignored");
            return Ok(out);
        }

        match event {
            ModelEvent::MessageStart { usage } => self.usage.merge(usage),

            ModelEvent::BlockStart { index, block } => {
                if let Some(open) = self.open.take() {
                    warn!(
                        open_index = open.index(),
                        new_index = index,
                        "block started while another was open, closing it"
                    );
                    self.close(open, &mut out);
                }
                self.open = Some(match block {
                    BlockStart::Text => OpenBlock::Text {
                        index,
                        text: String::new(),
                    },
                    BlockStart::ToolUse { id, name } => {
                        out.push(DecodedEvent::ToolUseStarted {
                            id: id.clone(),
                            name: name.clone(),
                        });
                        OpenBlock::ToolUse {
                            index,
                            id,
                            name,
                            buffer: String::new(),
                        }
                    }
                    BlockStart::Other(kind) => {
                        debug!(kind = %kind, index, "skipping unsupported block");
                        OpenBlock::Skipped { index }
                    }
                });
            }

            ModelEvent::BlockDelta { index, delta } => match (&mut self.open, delta) {
                (Some(OpenBlock::Text { text, .. }), BlockDelta::Text(fragment)) => {
                    text.push_str(&fragment);
                    out.push(DecodedEvent::TextDelta(fragment));
                }
                (Some(OpenBlock::ToolUse { buffer, .. }), BlockDelta::InputJson(fragment)) => {
                    buffer.push_str(&fragment);
                }
                (Some(OpenBlock::Skipped { .. }), _) | (_, BlockDelta::Other) => {}
                (None, _) => warn!(index, "delta without an open block ignored"),
                (Some(open), _) => warn!(
                    index,
                    open_index = open.index(),
                    "delta kind does not match open block, ignored"
                ),
            },

            ModelEvent::BlockStop { index } => match self.open.take() {
                Some(open) => {
                    if open.index() != index {
                        warn!(index, open_index = open.index(), "stop index mismatch");
                    }
                    self.close(open, &mut out);
                }
                None => warn!(index, "stop without an open block ignored"),
            },

            ModelEvent::MessageDelta { stop_reason, usage } => {
                if stop_reason.is_some() {
                    self.stop_reason = stop_reason;
                }
                self.usage.merge(usage);
            }

            ModelEvent::MessageStop => {
                if let Some(open) = self.open.take() {
                    warn!(index = open.index(), "message stopped with a block still open");
                    self.close(open, &mut out);
                }
                self.finished = true;
                out.push(DecodedEvent::Finished(self.take_round()));
            }

            ModelEvent::Error { error } => {
                self.finished = true;
                return Err(error);
            }
        }

        Ok(out)
    }

    fn close(&mut self, block: OpenBlock, out: &mut Vec<DecodedEvent>) {
        match block {
            OpenBlock::Text { text, .. } => {
                // The API rejects empty text blocks when they are sent back.
                if !text.is_empty() {
                    self.content.push(ContentBlock::Text { text });
                }
            }
            OpenBlock::ToolUse { id, name, buffer, .. } => {
                let call = ToolCall {
                    input: parse_tool_input(&name, &buffer),
                    id,
                    name,
                };
                self.content.push(ContentBlock::from(call.clone()));
                out.push(DecodedEvent::ToolUseReady(call));
            }
            OpenBlock::Skipped { .. } => {}
        }
    }

    fn take_round(&mut self) -> DecodedRound {
        let content = std::mem::take(&mut self.content);
        let stop_reason = self.stop_reason.take().or_else(|| {
            // No message_delta arrived; infer from what was produced.
            Some(if content.iter().any(ContentBlock::is_tool_use) {
                StopReason::ToolUse
            } else {
                StopReason::EndTurn
            })
        });
        DecodedRound {
            content,
            stop_reason,
            usage: self.usage,
        }
    }
}

/// Parse an accumulated tool input buffer, yielding `{}` for anything that
/// is not a complete JSON object.
pub fn parse_tool_input(tool: &str, buffer: &str) -> Value {
    if buffer.trim().is_empty() {
        return Value::Object(Map::new());
    }
    match serde_json::from_str::<Value>(buffer) {
        Ok(value @ Value::Object(_)) => value,
        Ok(other) => {
            warn!(tool, kind = json_kind(&other), "tool input is not an object, using {{}}");
            Value::Object(Map::new())
        }
        Err(e) => {
            warn!(tool, error = %e, len = buffer.len(), "unparseable tool input, using {{}}");
            Value::Object(Map::new())
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Drive a decoder over a model event stream.
///
/// The returned stream is finite: it ends after `Finished` or after the
/// first error. A stream that ends without `message_stop` yields
/// `StreamInterrupted`.
pub fn decode(
    mut events: ModelEventStream,
) -> impl Stream<Item = Result<DecodedEvent, GatewayError>> + Send {
    async_stream::stream! {
        let mut decoder = EventDecoder::new();
        let mut failed = false;
        while let Some(event) = events.next().await {
            match decoder.feed(event) {
                Ok(decoded) => {
                    for item in decoded {
                        yield Ok(item);
                    }
                }
                Err(error) => {
                    failed = true;
                    yield Err(error);
                }
            }
            if decoder.is_finished() {
                break;
            }
        }
        if !failed && !decoder.is_finished() {
            yield Err(GatewayError::StreamInterrupted(
                "stream ended before message_stop".into(),
            ));
        }
    }
}
