//! Tool-free extraction: ask the model for a JSON object and parse it.
//!
//! Parse failures keep the raw model text so callers can show what the model
//! actually said.

use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, warn};

use lexi_core::errors::GatewayError;
use lexi_core::messages::Message;
use lexi_core::provider::{LlmProvider, ModelRequest, StreamOptions};
use lexi_llm::{decode, DecodedEvent};

use crate::error::EngineError;
use crate::prompt::{extraction_request, EXTRACTION_PROMPT};

pub async fn extract_fields(
    provider: &dyn LlmProvider,
    options: &StreamOptions,
    source_text: &str,
    fields: &[String],
) -> Result<Value, EngineError> {
    let request = ModelRequest {
        system: EXTRACTION_PROMPT.to_string(),
        tools: Vec::new(),
        messages: vec![Message::user_text(extraction_request(source_text, fields))],
    };

    let events = provider.stream(&request, options).await?;
    let decoded = decode(events);
    futures::pin_mut!(decoded);

    while let Some(item) = decoded.next().await {
        if let DecodedEvent::Finished(round) = item? {
            let raw_text = round.text();
            debug!(chars = raw_text.len(), fields = fields.len(), "extraction response received");
            return parse_object(&raw_text, fields);
        }
    }
    Err(GatewayError::StreamInterrupted("stream ended without a result".into()).into())
}

/// Parse the model's reply into an object holding every requested field.
/// Fields the model left out are filled with null.
pub fn parse_object(raw_text: &str, fields: &[String]) -> Result<Value, EngineError> {
    let failure = |message: String| {
        warn!(error = %message, "structured output rejected");
        EngineError::StructuredOutput {
            message,
            raw_text: raw_text.to_string(),
        }
    };

    let body = json_body(raw_text).ok_or_else(|| failure("no JSON object in response".into()))?;
    let value: Value = serde_json::from_str(body).map_err(|e| failure(e.to_string()))?;
    let Value::Object(mut object) = value else {
        return Err(failure("response is not a JSON object".into()));
    };

    for field in fields {
        object.entry(field.clone()).or_insert(Value::Null);
    }
    Ok(Value::Object(object))
}

/// Strip markdown fences and any prose around the outermost braces.
fn json_body(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);

    let start = unfenced.find('{')?;
    let end = unfenced.rfind('}')?;
    (start < end).then(|| &unfenced[start..=end])
}
