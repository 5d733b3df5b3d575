use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use lexi_core::errors::GatewayError;
use lexi_core::ids::ToolUseId;
use lexi_core::messages::StopReason;
use lexi_core::stream::{BlockDelta, BlockStart, ModelEvent, TokenUsage};

/// Map one Messages API SSE event onto a [`ModelEvent`].
///
/// `event_type` may be empty when the server omitted the `event:` line; the
/// payload's own `type` field is used instead. Pings and unknown events map
/// to `None`.
pub fn parse_event(event_type: &str, data: &str) -> Option<ModelEvent> {
    let resolved;
    let event_type = if event_type.is_empty() {
        resolved = serde_json::from_str::<TypedPayload>(data).ok()?.kind;
        resolved.as_str()
    } else {
        event_type
    };

    match event_type {
        "message_start" => {
            let usage = serde_json::from_str::<MessageStartEvent>(data)
                .ok()
                .and_then(|m| m.message.usage)
                .map(UsagePayload::into_usage)
                .unwrap_or_default();
            Some(ModelEvent::MessageStart { usage })
        }

        "content_block_start" => {
            let start: ContentBlockStartEvent = decode_or_warn(event_type, data)?;
            let block = match start.content_block.get("type").and_then(Value::as_str) {
                Some("text") => BlockStart::Text,
                Some("tool_use") => BlockStart::ToolUse {
                    id: ToolUseId::from_raw(str_field(&start.content_block, "id")),
                    name: str_field(&start.content_block, "name").to_string(),
                },
                other => BlockStart::Other(other.unwrap_or("unknown").to_string()),
            };
            Some(ModelEvent::BlockStart {
                index: start.index,
                block,
            })
        }

        "content_block_delta" => {
            let delta: ContentBlockDeltaEvent = decode_or_warn(event_type, data)?;
            let parsed = match delta.delta.get("type").and_then(Value::as_str) {
                Some("text_delta") => BlockDelta::Text(str_field(&delta.delta, "text").to_string()),
                Some("input_json_delta") => {
                    BlockDelta::InputJson(str_field(&delta.delta, "partial_json").to_string())
                }
                _ => BlockDelta::Other,
            };
            Some(ModelEvent::BlockDelta {
                index: delta.index,
                delta: parsed,
            })
        }

        "content_block_stop" => {
            let stop: ContentBlockStopEvent = decode_or_warn(event_type, data)?;
            Some(ModelEvent::BlockStop { index: stop.index })
        }

        "message_delta" => {
            let delta: MessageDeltaEvent = decode_or_warn(event_type, data)?;
            Some(ModelEvent::MessageDelta {
                stop_reason: delta.delta.and_then(|d| d.stop_reason),
                usage: delta.usage.map(UsagePayload::into_usage).unwrap_or_default(),
            })
        }

        "message_stop" => Some(ModelEvent::MessageStop),

        "error" => {
            let error = match serde_json::from_str::<ErrorEvent>(data) {
                Ok(err) => classify_error(&err.error),
                Err(_) => GatewayError::StreamInterrupted(format!("unparseable error event: {data}")),
            };
            Some(ModelEvent::Error { error })
        }

        _ => None, // ping, etc.
    }
}

fn decode_or_warn<'a, T: Deserialize<'a>>(event_type: &str, data: &'a str) -> Option<T> {
    match serde_json::from_str(data) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(event_type, error = %e, "dropping malformed SSE event");
            None
        }
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("")
}

fn classify_error(err: &ErrorPayload) -> GatewayError {
    match err.error_type.as_str() {
        "overloaded_error" => GatewayError::ProviderOverloaded,
        "rate_limit_error" => GatewayError::RateLimited { retry_after: None },
        "authentication_error" | "permission_error" => {
            GatewayError::AuthenticationFailed(err.message.clone())
        }
        "invalid_request_error" => {
            if err.message.contains("context window") || err.message.contains("too many tokens") {
                GatewayError::ContextWindowExceeded(err.message.clone())
            } else {
                GatewayError::InvalidRequest(err.message.clone())
            }
        }
        "timeout_error" => GatewayError::Timeout(std::time::Duration::ZERO),
        _ => GatewayError::ServerError {
            status: 500,
            body: err.message.clone(),
        },
    }
}

/// Split raw SSE text into (event_type, data) pairs. Multiple `data:` lines
/// of one event are joined with newlines.
pub fn parse_sse_lines(raw: &str) -> Vec<(String, String)> {
    let mut events = Vec::new();
    let mut current_event = String::new();
    let mut current_data: Vec<&str> = Vec::new();

    for line in raw.lines() {
        if let Some(event) = line.strip_prefix("event:") {
            current_event = event.trim_start().to_string();
        } else if let Some(data) = line.strip_prefix("data:") {
            current_data.push(data.strip_prefix(' ').unwrap_or(data));
        } else if line.is_empty() {
            if !current_event.is_empty() || !current_data.is_empty() {
                events.push((std::mem::take(&mut current_event), current_data.join("\n")));
                current_data.clear();
            }
        }
    }

    // Trailing event without blank line
    if !current_event.is_empty() || !current_data.is_empty() {
        events.push((current_event, current_data.join("\n")));
    }

    events
}

// --- Deserialization types for Anthropic SSE events ---

#[derive(Deserialize)]
struct TypedPayload {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct MessageStartEvent {
    message: MessageStartPayload,
}

#[derive(Deserialize)]
struct MessageStartPayload {
    usage: Option<UsagePayload>,
}

#[derive(Deserialize)]
struct UsagePayload {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

impl UsagePayload {
    fn into_usage(self) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens.unwrap_or(0),
            output_tokens: self.output_tokens.unwrap_or(0),
        }
    }
}

#[derive(Deserialize)]
struct ContentBlockStartEvent {
    index: usize,
    content_block: Value,
}

#[derive(Deserialize)]
struct ContentBlockDeltaEvent {
    index: usize,
    delta: Value,
}

#[derive(Deserialize)]
struct ContentBlockStopEvent {
    index: usize,
}

#[derive(Deserialize)]
struct MessageDeltaEvent {
    delta: Option<MessageDeltaPayload>,
    usage: Option<UsagePayload>,
}

#[derive(Deserialize)]
struct MessageDeltaPayload {
    stop_reason: Option<StopReason>,
}

#[derive(Deserialize)]
struct ErrorEvent {
    error: ErrorPayload,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}
