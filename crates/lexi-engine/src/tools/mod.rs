pub mod apply_edits;
pub mod extract_information;
pub mod generate_document;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use lexi_core::tools::ToolError;

use crate::registry::ToolRegistry;

/// A registry holding the three document tools.
pub fn create_default_registry(tool_timeout: Duration) -> ToolRegistry {
    let mut registry = ToolRegistry::new().with_timeout(tool_timeout);
    registry.register(Arc::new(extract_information::ExtractInformationTool));
    registry.register(Arc::new(generate_document::GenerateDocumentTool));
    registry.register(Arc::new(apply_edits::ApplyEditsTool));
    registry
}

fn required_str<'a>(input: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    input[key]
        .as_str()
        .ok_or_else(|| ToolError::MissingInput(key.to_string()))
}

fn optional_str<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input[key].as_str()
}

fn string_list(input: &Value, key: &str) -> Option<Vec<String>> {
    input[key].as_array().map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect()
    })
}

fn to_pretty_json(value: &Value) -> Result<String, ToolError> {
    serde_json::to_string_pretty(value).map_err(|e| ToolError::Execution(format!("failed to encode result: {e}")))
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// First `max` characters of `text`.
fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// "key_points" -> "Key Points", "report" -> "Report".
fn title_case(text: &str) -> String {
    text.split(|c: char| c == '_' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
