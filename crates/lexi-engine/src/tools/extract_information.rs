use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map, Value};

use lexi_core::tools::{Tool, ToolContext, ToolError, ToolOutput};

use super::{optional_str, required_str, string_list, title_case, to_pretty_json, truncate_chars, word_count};

const MONTHS: &str = "January|February|March|April|May|June|July|August|September|October|November|December";
const SNIPPET_CHARS: usize = 200;

static DATE_RES: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"\b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b").expect("static pattern"),
        Regex::new(&format!(r"(?i)\b(?:{MONTHS})\s+\d{{1,2}},?\s+\d{{4}}\b")).expect("static pattern"),
        Regex::new(&format!(r"(?i)\b\d{{1,2}}\s+(?:{MONTHS})\s+\d{{4}}\b")).expect("static pattern"),
    ]
});
static MONEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\$[\d,]+(?:\.\d{2})?|\b\d+(?:,\d{3})*(?:\.\d{2})?\s*(?:dollars|USD|EUR|GBP)\b")
        .expect("static pattern")
});
static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b\d+(?:\.\d+)?%|\b\d+(?:\.\d+)?\s*percent\b").expect("static pattern"));
static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b\d+\s*(?:days?|weeks?|months?|years?|hours?|minutes?)\b").expect("static pattern")
});
static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("static pattern"));
static PARTY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:by and between|between|parties|party|company|corporation|llc|inc|ltd)\s*[:\s]*([A-Z][A-Za-z\s,.]+?)\s*(?:\band\b|,|\(|$)",
    )
    .expect("static pattern")
});
static SENTENCE_SPLIT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!?]+").expect("static pattern"));
static DEADLINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:by|before|within|no later than|deadline)[:\s]+([^.]+)").expect("static pattern")
});
static QUOTED_TERM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""([A-Z][^"]+)""#).expect("static pattern"));
static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?:ARTICLE|SECTION|CLAUSE|\d+\.|\([a-z]\)|\([0-9]+\))\s*[A-Z]+").expect("static pattern")
});

/// Regex heuristics over contract text: entities, obligations, summaries,
/// document metadata, or caller-named fields.
pub struct ExtractInformationTool;

#[async_trait]
impl Tool for ExtractInformationTool {
    fn name(&self) -> &str {
        "extract_information"
    }

    fn description(&self) -> &str {
        "Extract structured information from text. Use this to pull out specific data points, \
         entities, facts, or key details from unstructured content."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "source_text": {
                    "type": "string",
                    "description": "The text to extract information from"
                },
                "extraction_type": {
                    "type": "string",
                    "enum": ["entities", "facts", "key_points", "metadata", "custom"],
                    "description": "The type of information to extract"
                },
                "fields": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Specific fields or data points to extract (e.g., ['name', 'date', 'location'])"
                },
                "output_format": {
                    "type": "string",
                    "enum": ["json", "markdown", "plain_text"],
                    "default": "json",
                    "description": "Format for the extracted information"
                }
            },
            "required": ["source_text", "extraction_type"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let text = required_str(&input, "source_text")?;
        let extraction_type = required_str(&input, "extraction_type")?;
        let fields = string_list(&input, "fields").unwrap_or_default();
        let output_format = optional_str(&input, "output_format").unwrap_or("json");

        let extracted = match extraction_type {
            "entities" => entities(text),
            "facts" => facts(text),
            "key_points" => key_points(text),
            "metadata" => metadata(text),
            "custom" if !fields.is_empty() => custom_fields(text, &fields)?,
            _ => json!({ "raw_text_preview": truncate_chars(text, 500) }),
        };

        let result = json!({
            "success": true,
            "extraction_type": extraction_type,
            "source_stats": {
                "character_count": text.chars().count(),
                "word_count": word_count(text),
                "line_count": text.lines().count(),
            },
            "extracted_data": extracted,
        });

        let content = match output_format {
            "markdown" => format_markdown(&result),
            "plain_text" => format_plain_text(&result),
            _ => to_pretty_json(&result)?,
        };
        Ok(ToolOutput::text(content))
    }
}

/// Distinct values in first-seen order.
fn dedup(values: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = Vec::new();
    for v in values {
        if !seen.contains(&v) {
            seen.push(v);
        }
    }
    seen
}

fn all_matches(re: &Regex, text: &str) -> Vec<String> {
    re.find_iter(text).map(|m| m.as_str().to_string()).collect()
}

fn first_groups(re: &Regex, text: &str) -> Vec<String> {
    re.captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Only categories that found something are reported.
fn non_empty(categories: Vec<(&str, Vec<String>)>) -> Value {
    let map: Map<String, Value> = categories
        .into_iter()
        .filter(|(_, values)| !values.is_empty())
        .map(|(key, values)| (key.to_string(), json!(values)))
        .collect();
    Value::Object(map)
}

fn sentences(text: &str) -> impl Iterator<Item = &str> {
    SENTENCE_SPLIT_RE.split(text)
}

fn entities(text: &str) -> Value {
    let dates = DATE_RES.iter().flat_map(|re| all_matches(re, text));
    let parties = first_groups(&PARTY_RE, text)
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty());

    non_empty(vec![
        ("parties", dedup(parties)),
        ("dates", dedup(dates)),
        ("monetary_values", dedup(all_matches(&MONEY_RE, text))),
        ("percentages", dedup(all_matches(&PERCENT_RE, text))),
        ("durations", dedup(all_matches(&DURATION_RE, text))),
        ("emails", dedup(all_matches(&EMAIL_RE, text))),
    ])
}

fn facts(text: &str) -> Value {
    const OBLIGATION: &[&str] = &["shall", "must", "agrees to", "is required to", "will provide", "will deliver"];
    const CONDITION: &[&str] = &["if ", "unless ", "provided that", "subject to", "in the event"];
    const PROHIBITION: &[&str] = &["shall not", "may not", "prohibited", "forbidden", "not permitted"];
    const DEFINITION: &[&str] = &["\" means", "' means", "refers to", "defined as", "shall mean"];

    let mut obligations = Vec::new();
    let mut conditions = Vec::new();
    let mut prohibitions = Vec::new();
    let mut definitions = Vec::new();

    for sentence in sentences(text).map(str::trim).filter(|s| !s.is_empty()) {
        let lower = sentence.to_lowercase();
        let snippet = || truncate_chars(sentence, SNIPPET_CHARS);
        for (phrases, bucket) in [
            (OBLIGATION, &mut obligations),
            (CONDITION, &mut conditions),
            (PROHIBITION, &mut prohibitions),
            (DEFINITION, &mut definitions),
        ] {
            if phrases.iter().any(|p| lower.contains(p)) {
                bucket.push(snippet());
            }
        }
    }

    let cap = |mut v: Vec<String>| {
        v.truncate(10);
        v
    };
    non_empty(vec![
        ("obligations", cap(obligations)),
        ("conditions", cap(conditions)),
        ("prohibitions", cap(prohibitions)),
        ("definitions", cap(definitions)),
    ])
}

fn key_points(text: &str) -> Value {
    const ACTION: &[&str] = &["must", "shall", "will", "need to", "required to", "responsible for"];

    let summary: Vec<String> = sentences(text)
        .take(3)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| truncate_chars(s, SNIPPET_CHARS))
        .collect();

    let actions: Vec<String> = sentences(text)
        .filter(|s| {
            let lower = s.to_lowercase();
            ACTION.iter().any(|k| lower.contains(k))
        })
        .map(|s| truncate_chars(s.trim(), SNIPPET_CHARS))
        .take(5)
        .collect();

    let mut deadlines = first_groups(&DEADLINE_RE, text);
    deadlines.truncate(5);

    let mut terms = dedup(first_groups(&QUOTED_TERM_RE, text));
    terms.truncate(10);

    non_empty(vec![
        ("summary_sentences", summary),
        ("important_terms", terms),
        ("action_items", actions),
        ("deadlines", deadlines),
    ])
}

fn detect_document_type(lower: &str) -> &'static str {
    if lower.contains("non-disclosure") || lower.contains("confidentiality agreement") {
        "Non-Disclosure Agreement (NDA)"
    } else if lower.contains("employment") && lower.contains("agreement") {
        "Employment Agreement"
    } else if lower.contains("service agreement") || lower.contains("services agreement") {
        "Service Agreement"
    } else if lower.contains("lease") {
        "Lease Agreement"
    } else if lower.contains("purchase") && lower.contains("agreement") {
        "Purchase Agreement"
    } else if lower.contains("terms of service") || lower.contains("terms and conditions") {
        "Terms of Service"
    } else if lower.contains("privacy policy") {
        "Privacy Policy"
    } else {
        "Unknown"
    }
}

fn metadata(text: &str) -> Value {
    const SIGNATURE: &[&str] = &[
        "signature:",
        "signed:",
        "in witness whereof",
        "executed as of",
        "authorized signature",
    ];

    let lower = text.to_lowercase();
    let words = word_count(text);
    let mut sections = all_matches(&SECTION_RE, text);
    sections.truncate(20);

    json!({
        "document_type": detect_document_type(&lower),
        "word_count": words,
        "character_count": text.chars().count(),
        "paragraph_count": text.split("\n\n").filter(|p| !p.trim().is_empty()).count(),
        "estimated_reading_time_minutes": (words / 200).max(1),
        "sections_detected": sections,
        "has_signature_block": SIGNATURE.iter().any(|p| lower.contains(p)),
        "language": "English",
    })
}

/// Look for "<field>: value" or "<field> = value" in the lowercased text.
fn custom_fields(text: &str, fields: &[String]) -> Result<Value, ToolError> {
    let lower = text.to_lowercase();
    let mut extracted = Map::new();

    for field in fields {
        let needle = regex::escape(&field.to_lowercase().replace('_', " "));
        let patterns = [
            format!(r"(?i){needle}[:\s]+([^.\n]+)"),
            format!(r"(?i){needle}\s*[:=]\s*([^.\n]+)"),
        ];

        let mut found = None;
        for pattern in &patterns {
            let re = Regex::new(pattern)
                .map_err(|e| ToolError::InvalidInput(format!("unusable field name {field:?}: {e}")))?;
            if let Some(m) = re.captures(&lower).and_then(|c| c.get(1)) {
                found = Some(truncate_chars(m.as_str().trim(), SNIPPET_CHARS));
                break;
            }
        }

        let value = found.unwrap_or_else(|| format!("[Not found in document - searched for '{field}']"));
        extracted.insert(field.clone(), Value::String(value));
    }

    Ok(Value::Object(extracted))
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn format_markdown(result: &Value) -> String {
    let mut md = String::from("# Extraction Results\n\n");
    md.push_str(&format!("**Type:** {}\n\n", display(&result["extraction_type"])));
    md.push_str("## Source Statistics\n");
    if let Some(stats) = result["source_stats"].as_object() {
        for (key, value) in stats {
            md.push_str(&format!("- {}: {}\n", title_case(key), display(value)));
        }
    }
    md.push_str("\n## Extracted Data\n\n");
    if let Some(data) = result["extracted_data"].as_object() {
        for (key, value) in data {
            md.push_str(&format!("### {}\n", title_case(key)));
            match value.as_array() {
                Some(items) => items.iter().for_each(|item| md.push_str(&format!("- {}\n", display(item)))),
                None => md.push_str(&format!("{}\n", display(value))),
            }
            md.push('\n');
        }
    }
    md
}

fn format_plain_text(result: &Value) -> String {
    let mut lines = vec![
        format!("Extraction Type: {}", display(&result["extraction_type"])),
        String::new(),
    ];
    if let Some(data) = result["extracted_data"].as_object() {
        for (key, value) in data {
            lines.push(format!("{}:", key.to_uppercase()));
            match value.as_array() {
                Some(items) => lines.extend(items.iter().map(|item| format!("  - {}", display(item)))),
                None => lines.push(format!("  {}", display(value))),
            }
            lines.push(String::new());
        }
    }
    lines.join("\n")
}
