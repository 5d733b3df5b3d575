//! Prompts sent to the model.
//!
//! The assistant prompt is compiled in from `system.md`. Deployments can
//! replace it through the engine settings.

/// Default system prompt for chat turns.
pub const SYSTEM_PROMPT: &str = include_str!("system.md");

/// System prompt for one-shot structured extraction.
pub const EXTRACTION_PROMPT: &str = "You extract data from documents. Reply with a single JSON object \
and nothing else: no prose, no markdown fences. Use null for any field the document does not contain.";

/// User message asking for `fields` out of `source_text`.
pub fn extraction_request(source_text: &str, fields: &[String]) -> String {
    let keys = fields
        .iter()
        .map(|f| format!("\"{f}\""))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Extract these fields as JSON object keys: {keys}\n\n\
         Document:\n<<<\n{source_text}\n>>>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_names_every_tool() {
        for tool in ["extract_information", "generate_document", "apply_edits"] {
            assert!(SYSTEM_PROMPT.contains(tool), "{tool} missing");
        }
        assert!(SYSTEM_PROMPT.contains("not legal advice"));
    }

    #[test]
    fn extraction_request_lists_fields() {
        let msg = extraction_request("Lease between A and B.", &["landlord".into(), "rent".into()]);
        assert!(msg.starts_with("Extract these fields as JSON object keys: \"landlord\", \"rent\""));
        assert!(msg.contains("<<<\nLease between A and B.\n>>>"));
    }
}
