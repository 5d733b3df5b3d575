use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::documents::Diff;
use crate::ids::{SessionId, ToolUseId, TurnId};
use crate::messages::StopReason;

/// Progress of one turn, in emission order.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    TurnStart {
        session_id: SessionId,
        turn_id: TurnId,
    },
    TextDelta {
        delta: String,
    },
    ToolStart {
        tool_use_id: ToolUseId,
        name: String,
    },
    ToolExecuting {
        tool_use_id: ToolUseId,
        name: String,
    },
    ToolResult {
        tool_use_id: ToolUseId,
        name: String,
        is_error: bool,
        duration_ms: u64,
    },
    ArtifactUpdate {
        version: u32,
        content: String,
        created_at: DateTime<Utc>,
    },
    ArtifactDiff {
        version: u32,
        diff: Diff,
    },
    RoundComplete {
        round: u32,
        stop_reason: StopReason,
    },
    Done {
        turn_id: TurnId,
        rounds: u32,
    },
    Error {
        kind: String,
        message: String,
    },
}

impl TurnEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TurnStart { .. } => "turn_start",
            Self::TextDelta { .. } => "text_delta",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolExecuting { .. } => "tool_executing",
            Self::ToolResult { .. } => "tool_result",
            Self::ArtifactUpdate { .. } => "artifact_update",
            Self::ArtifactDiff { .. } => "artifact_diff",
            Self::RoundComplete { .. } => "round_complete",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}
