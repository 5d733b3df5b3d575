use std::fmt::Write as _;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde_json::{json, Value};

use lexi_core::tools::{Tool, ToolContext, ToolError, ToolOutput};

use super::{optional_str, required_str, string_list, title_case, to_pretty_json, truncate_chars, word_count};

const RULE_WIDE: usize = 60;
const RULE_NARROW: usize = 40;
const TRUNCATION_NOTE: &str = "\n\n[Document truncated to meet length requirement]";

/// Renders a titled document skeleton. The rendered body becomes the
/// session's next document version.
pub struct GenerateDocumentTool;

#[async_trait]
impl Tool for GenerateDocumentTool {
    fn name(&self) -> &str {
        "generate_document"
    }

    fn description(&self) -> &str {
        "Generate a structured document based on specifications. Use this to create reports, \
         summaries, articles, or other formatted content."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "document_type": {
                    "type": "string",
                    "enum": ["report", "summary", "article", "email", "memo", "proposal", "custom"],
                    "description": "The type of document to generate"
                },
                "title": {
                    "type": "string",
                    "description": "Title or subject of the document"
                },
                "content_requirements": {
                    "type": "string",
                    "description": "Description of what the document should contain"
                },
                "sections": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "List of sections to include (e.g., ['Introduction', 'Analysis', 'Conclusion'])"
                },
                "tone": {
                    "type": "string",
                    "enum": ["formal", "informal", "technical", "casual", "professional"],
                    "default": "professional",
                    "description": "Writing tone for the document"
                },
                "max_length": {
                    "type": "integer",
                    "description": "Maximum length in words (optional)"
                }
            },
            "required": ["document_type", "title", "content_requirements"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let document_type = required_str(&input, "document_type")?;
        let title = required_str(&input, "title")?;
        let requirements = required_str(&input, "content_requirements")?;
        let tone = optional_str(&input, "tone").unwrap_or("professional");
        let sections = string_list(&input, "sections").unwrap_or_else(|| default_sections(document_type));
        let max_length = input["max_length"].as_u64().filter(|n| *n > 0);

        let now = Local::now();
        let mut body = render(document_type, title, requirements, &sections, tone, now);

        if let Some(limit) = max_length.and_then(|n| usize::try_from(n).ok()) {
            let words: Vec<&str> = body.split_whitespace().collect();
            if words.len() > limit {
                body = words[..limit].join(" ") + TRUNCATION_NOTE;
            }
        }

        let result = json!({
            "success": true,
            "document_type": document_type,
            "title": title,
            "tone": tone,
            "generated_at": now.to_rfc3339(),
            "content": body,
            "metadata": {
                "sections_count": sections.len(),
                "estimated_word_count": word_count(&body),
            }
        });

        Ok(ToolOutput::text(to_pretty_json(&result)?).with_artifact(body))
    }
}

fn default_sections(document_type: &str) -> Vec<String> {
    let names: &[&str] = match document_type {
        "report" => &[
            "Executive Summary",
            "Introduction",
            "Findings",
            "Analysis",
            "Recommendations",
            "Conclusion",
        ],
        "summary" => &["Overview", "Key Points", "Details", "Conclusion"],
        "article" => &["Introduction", "Background", "Main Content", "Conclusion"],
        "email" => &["Greeting", "Purpose", "Details", "Call to Action", "Closing"],
        "memo" => &["To/From/Date/Subject", "Purpose", "Background", "Discussion", "Action Required"],
        "proposal" => &[
            "Executive Summary",
            "Problem Statement",
            "Proposed Solution",
            "Implementation",
            "Timeline",
            "Budget",
            "Conclusion",
        ],
        _ => &["Introduction", "Body", "Conclusion"],
    };
    names.iter().map(|s| s.to_string()).collect()
}

/// Salutation and sign-off for letter-style documents.
fn salutation(tone: &str) -> (&'static str, &'static str) {
    match tone {
        "formal" => ("Dear Sir/Madam,", "Respectfully,"),
        "informal" => ("Hi,", "Best,"),
        "technical" => ("", ""),
        "casual" => ("Hey,", "Cheers,"),
        _ => ("Dear [Recipient],", "Best regards,"),
    }
}

fn render(
    document_type: &str,
    title: &str,
    requirements: &str,
    sections: &[String],
    tone: &str,
    now: DateTime<Local>,
) -> String {
    let wide = "=".repeat(RULE_WIDE);
    let narrow = "-".repeat(RULE_NARROW);
    let letter = matches!(document_type, "email" | "memo");
    let (greeting, closing) = salutation(tone);
    let preview = truncate_chars(requirements, 100);

    let mut doc = String::new();
    let _ = writeln!(doc, "{wide}\n{}\n{wide}\n", title.to_uppercase());
    let _ = writeln!(doc, "Document Type: {}", title_case(document_type));
    let _ = writeln!(doc, "Date: {}", now.format("%B %d, %Y"));
    let _ = writeln!(doc, "Tone: {}\n\n---\n", title_case(tone));
    let _ = writeln!(doc, "CONTENT REQUIREMENTS:\n{requirements}\n\n---\n");

    if letter && !greeting.is_empty() {
        let _ = writeln!(doc, "{greeting}\n");
    }

    for (i, section) in sections.iter().enumerate() {
        let _ = writeln!(doc, "\n{}. {}\n{narrow}\n", i + 1, section.to_uppercase());
        let _ = writeln!(doc, "[Content for \"{section}\" section]\n");
        let _ = writeln!(doc, "This section should address the following based on requirements:");
        let _ = writeln!(doc, "- Relevant points from: {preview}...");
        let _ = writeln!(doc, "- Appropriate {tone} tone throughout");
        let _ = writeln!(doc, "- Clear and concise language\n");
    }

    if letter && !closing.is_empty() {
        let _ = writeln!(doc, "{closing}\n[Name]\n");
    }

    let _ = writeln!(doc, "\n---\n\nNOTES:");
    let _ = writeln!(doc, "- This is a generated document structure");
    let _ = writeln!(doc, "- Please review and fill in the bracketed sections");
    let _ = writeln!(doc, "- Customize content to match specific needs");
    let _ = writeln!(doc, "- Have legal counsel review before finalizing (if applicable)\n");
    let _ = writeln!(doc, "{wide}\nGenerated by LexiDoc Assistant\n{wide}");
    doc
}
