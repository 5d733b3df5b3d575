//! Turn events to server-sent-event frames.
//!
//! Every frame is `data: <payload>\n\n`. Payloads that could contain line
//! breaks are base64 so they never split a frame.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Serialize;
use serde_json::json;

use lexi_core::events::TurnEvent;

/// Longer text deltas are always encoded.
pub const MAX_PLAIN_TEXT_BYTES: usize = 512;

pub const DONE: &str = "[DONE]";

/// The wire frame for `event`, or `None` for events clients never see.
pub fn frame(event: &TurnEvent) -> Option<String> {
    let payload = match event {
        TurnEvent::TurnStart { .. } | TurnEvent::RoundComplete { .. } => return None,
        TurnEvent::TextDelta { delta } if delta.is_empty() => return None,
        TurnEvent::TextDelta { delta } => text_payload(delta),
        TurnEvent::ToolStart { name, .. } => format!("[TOOL_START:{}]", marker_name(name)),
        TurnEvent::ToolExecuting { name, .. } => format!("[TOOL_EXECUTING:{}]", marker_name(name)),
        TurnEvent::ToolResult { name, .. } => format!("[TOOL_RESULT:{}]", marker_name(name)),
        TurnEvent::ArtifactUpdate {
            version,
            content,
            created_at,
        } => format!(
            "[ARTIFACT:{}]",
            encode_json(&json!({
                "version": version,
                "content": content,
                "created_at": created_at,
            }))
        ),
        TurnEvent::ArtifactDiff { version, diff } => format!(
            "[ARTIFACT_DIFF:{}]",
            encode_json(&json!({ "version": version, "diff": diff }))
        ),
        TurnEvent::Error { kind, message } => format!(
            "[ERROR:{}]",
            encode_json(&json!({ "kind": kind, "message": message }))
        ),
        TurnEvent::Done { .. } => DONE.to_string(),
    };
    Some(format!("data: {payload}\n\n"))
}

fn text_payload(delta: &str) -> String {
    let needs_encoding = delta.len() > MAX_PLAIN_TEXT_BYTES
        || delta.starts_with('[')
        || delta.contains(['\r', '\n']);
    if needs_encoding {
        format!("[TEXT:{}]", STANDARD.encode(delta))
    } else {
        delta.to_string()
    }
}

/// Tool names come from the model, so keep only characters that cannot
/// break a marker.
fn marker_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

fn encode_json(value: &impl Serialize) -> String {
    // serializing a serde_json::Value cannot fail
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lexi_core::documents::{Diff, LineEntry};
    use lexi_core::ids::{SessionId, ToolUseId, TurnId};
    use lexi_core::messages::StopReason;
    use serde_json::Value;

    fn payload(frame: &str) -> &str {
        frame
            .strip_prefix("data: ")
            .and_then(|f| f.strip_suffix("\n\n"))
            .expect("well-formed frame")
    }

    fn decode_marker(frame: &str, marker: &str) -> Value {
        let body = payload(frame)
            .strip_prefix(&format!("[{marker}:"))
            .and_then(|p| p.strip_suffix(']'))
            .expect("marker present");
        serde_json::from_slice(&STANDARD.decode(body).unwrap()).unwrap()
    }

    #[test]
    fn internal_events_have_no_frame() {
        assert!(frame(&TurnEvent::TurnStart {
            session_id: SessionId::new(),
            turn_id: TurnId::new(),
        })
        .is_none());
        assert!(frame(&TurnEvent::RoundComplete {
            round: 1,
            stop_reason: StopReason::EndTurn,
        })
        .is_none());
        assert!(frame(&TurnEvent::TextDelta { delta: String::new() }).is_none());
    }

    #[test]
    fn short_text_is_sent_raw() {
        let f = frame(&TurnEvent::TextDelta { delta: "Hello, world".into() }).unwrap();
        assert_eq!(f, "data: Hello, world\n\n");
    }

    #[test]
    fn risky_text_is_base64() {
        for delta in ["line one\nline two", "[DONE]", "carriage\rreturn", "x".repeat(600).as_str()] {
            let f = frame(&TurnEvent::TextDelta { delta: delta.to_string() }).unwrap();
            let body = payload(&f)
                .strip_prefix("[TEXT:")
                .and_then(|p| p.strip_suffix(']'))
                .unwrap();
            assert!(!body.contains('\n'));
            assert_eq!(STANDARD.decode(body).unwrap(), delta.as_bytes());
        }
    }

    #[test]
    fn tool_markers() {
        let id = ToolUseId::new();
        let start = frame(&TurnEvent::ToolStart {
            tool_use_id: id.clone(),
            name: "apply_edits".into(),
        });
        assert_eq!(start.as_deref(), Some("data: [TOOL_START:apply_edits]\n\n"));

        let exec = frame(&TurnEvent::ToolExecuting {
            tool_use_id: id.clone(),
            name: "apply_edits".into(),
        });
        assert_eq!(exec.as_deref(), Some("data: [TOOL_EXECUTING:apply_edits]\n\n"));

        let result = frame(&TurnEvent::ToolResult {
            tool_use_id: id,
            name: "bad]\nname".into(),
            is_error: true,
            duration_ms: 3,
        });
        assert_eq!(result.as_deref(), Some("data: [TOOL_RESULT:bad__name]\n\n"));
    }

    #[test]
    fn artifact_frames_carry_encoded_json() {
        let created_at = Utc::now();
        let update = frame(&TurnEvent::ArtifactUpdate {
            version: 2,
            content: "Clause 1\nClause 2".into(),
            created_at,
        })
        .unwrap();
        let json = decode_marker(&update, "ARTIFACT");
        assert_eq!(json["version"], 2);
        assert_eq!(json["content"], "Clause 1\nClause 2");
        assert!(json["created_at"].is_string());

        let diff = Diff::new(
            vec![LineEntry {
                line: 2,
                content: "Clause 2".into(),
            }],
            vec![],
            vec![],
        );
        let f = frame(&TurnEvent::ArtifactDiff { version: 2, diff }).unwrap();
        let json = decode_marker(&f, "ARTIFACT_DIFF");
        assert_eq!(json["version"], 2);
        assert_eq!(json["diff"]["has_changes"], true);
        assert_eq!(json["diff"]["additions"][0]["line"], 2);
    }

    #[test]
    fn error_and_done() {
        let f = frame(&TurnEvent::Error {
            kind: "rate_limited".into(),
            message: "slow down\nplease".into(),
        })
        .unwrap();
        let json = decode_marker(&f, "ERROR");
        assert_eq!(json["kind"], "rate_limited");
        assert_eq!(json["message"], "slow down\nplease");

        let done = frame(&TurnEvent::Done {
            turn_id: TurnId::new(),
            rounds: 1,
        });
        assert_eq!(done.as_deref(), Some("data: [DONE]\n\n"));
    }
}
