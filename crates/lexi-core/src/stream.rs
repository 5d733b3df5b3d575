use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;
use crate::ids::ToolUseId;
use crate::messages::StopReason;

/// Low-level events of one streamed model response.
///
/// These mirror the Messages API event stream one-to-one; turning them into
/// content blocks is the decoder's job.
#[derive(Clone, Debug)]
pub enum ModelEvent {
    MessageStart { usage: TokenUsage },
    BlockStart { index: usize, block: BlockStart },
    BlockDelta { index: usize, delta: BlockDelta },
    BlockStop { index: usize },
    MessageDelta { stop_reason: Option<StopReason>, usage: TokenUsage },
    MessageStop,
    Error { error: GatewayError },
}

#[derive(Clone, Debug, PartialEq)]
pub enum BlockStart {
    Text,
    ToolUse { id: ToolUseId, name: String },
    /// Block kinds this service does not consume (thinking, etc.).
    Other(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum BlockDelta {
    Text(String),
    InputJson(String),
    Other,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    /// Fold a later usage report into this one. The API reports input tokens
    /// at message start and the running output total in message deltas.
    pub fn merge(&mut self, other: TokenUsage) {
        if other.input_tokens > 0 {
            self.input_tokens = other.input_tokens;
        }
        if other.output_tokens > 0 {
            self.output_tokens = other.output_tokens;
        }
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

impl ModelEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::MessageStop | Self::Error { .. })
    }
}
