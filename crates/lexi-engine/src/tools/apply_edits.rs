use std::sync::LazyLock;

use async_trait::async_trait;
use regex::{Captures, Regex};
use serde_json::{json, Value};

use lexi_core::tools::{Tool, ToolContext, ToolError, ToolOutput};

use super::{optional_str, required_str, to_pretty_json, word_count};

static MULTI_SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" {2,}").expect("static pattern"));
static SPACE_BEFORE_PUNCT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+([.,!?;:])").expect("static pattern"));
static SENTENCE_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([.!?]\s+)([a-z])").expect("static pattern"));
static PARAGRAPH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.\s*([A-Z])").expect("static pattern"));
static BLANK_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").expect("static pattern"));

/// Plain-language substitutions for common legalese.
static SIMPLIFICATIONS: LazyLock<Vec<(&'static str, Regex, &'static str)>> = LazyLock::new(|| {
    [
        ("utilize", "use"),
        ("commence", "start"),
        ("terminate", "end"),
        ("subsequent", "next"),
        ("prior to", "before"),
        ("in the event that", "if"),
        ("notwithstanding", "despite"),
        ("pursuant to", "under"),
        ("whereas", "while"),
        ("hereinafter", "from now on"),
        ("aforementioned", "mentioned above"),
    ]
    .into_iter()
    .map(|(phrase, plain)| {
        let re = Regex::new(&format!(r"(?i)\b{phrase}\b")).expect("static pattern");
        (phrase, re, plain)
    })
    .collect()
});

const CONTRACTIONS: &[(&str, &str)] = &[("can't", "cannot"), ("won't", "will not"), ("don't", "do not")];

/// Rule-based rewrites of a passage. The edited text becomes the session's
/// next document version.
pub struct ApplyEditsTool;

#[async_trait]
impl Tool for ApplyEditsTool {
    fn name(&self) -> &str {
        "apply_edits"
    }

    fn description(&self) -> &str {
        "Apply edits or modifications to existing text. Use this to revise, reformat, correct, \
         or transform content."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "original_text": {
                    "type": "string",
                    "description": "The original text to be edited"
                },
                "edit_type": {
                    "type": "string",
                    "enum": ["grammar", "style", "tone", "format", "simplify", "expand", "translate", "custom"],
                    "description": "The type of edit to apply"
                },
                "instructions": {
                    "type": "string",
                    "description": "Specific instructions for how to edit the text"
                },
                "preserve_meaning": {
                    "type": "boolean",
                    "default": true,
                    "description": "Whether to preserve the original meaning while editing"
                },
                "target_language": {
                    "type": "string",
                    "description": "Target language for translation (only used when edit_type is 'translate')"
                }
            },
            "required": ["original_text", "edit_type"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let original = required_str(&input, "original_text")?;
        let edit_type = required_str(&input, "edit_type")?;
        let instructions = optional_str(&input, "instructions");
        let preserve_meaning = input["preserve_meaning"].as_bool().unwrap_or(true);

        let Edit { text, changes } = match edit_type {
            "grammar" => grammar(original),
            "simplify" => simplify(original),
            "format" => reformat(original),
            "expand" => expand(original, instructions),
            "tone" => tone(original, instructions),
            "style" => style(original, instructions),
            "translate" => translate(original, optional_str(&input, "target_language")),
            "custom" => custom(original, instructions),
            other => return Err(ToolError::InvalidInput(format!("unsupported edit_type: {other}"))),
        };

        let result = json!({
            "success": true,
            "edit_type": edit_type,
            "preserve_meaning": preserve_meaning,
            "original": stats(original),
            "edited": stats(&text),
            "changes": changes,
        });

        Ok(ToolOutput::text(to_pretty_json(&result)?).with_artifact(text))
    }
}

struct Edit {
    text: String,
    changes: Vec<String>,
}

fn stats(text: &str) -> Value {
    json!({
        "text": text,
        "word_count": word_count(text),
        "character_count": text.chars().count(),
    })
}

fn grammar(original: &str) -> Edit {
    let mut changes = Vec::new();

    let spaced = MULTI_SPACE_RE.replace_all(original, " ");
    if spaced != original {
        changes.push("Removed extra spaces".to_string());
    }

    let punctuated = SPACE_BEFORE_PUNCT_RE.replace_all(&spaced, "$1");
    if punctuated != spaced {
        changes.push("Fixed spacing around punctuation".to_string());
    }

    let capitalized = SENTENCE_START_RE.replace_all(&punctuated, |caps: &Captures| {
        format!("{}{}", &caps[1], caps[2].to_uppercase())
    });
    let mut text = capitalized.into_owned();
    if let Some(first) = text.chars().next().filter(char::is_ascii_lowercase) {
        text.replace_range(..first.len_utf8(), &first.to_ascii_uppercase().to_string());
    }
    if text != punctuated {
        changes.push("Capitalized sentence beginnings".to_string());
    }

    if changes.is_empty() {
        changes.push("No grammar issues detected".to_string());
    }
    Edit { text, changes }
}

fn simplify(original: &str) -> Edit {
    let mut text = original.to_string();
    let mut changes = Vec::new();

    for (phrase, re, plain) in SIMPLIFICATIONS.iter() {
        if re.is_match(&text) {
            text = re.replace_all(&text, *plain).into_owned();
            changes.push(format!("Simplified: '{phrase}' → '{plain}'"));
        }
    }

    if changes.is_empty() {
        changes.push("Text is already relatively simple".to_string());
    }
    Edit { text, changes }
}

fn reformat(original: &str) -> Edit {
    let broken = PARAGRAPH_RE.replace_all(original, ".\n\n$1");
    let text = BLANK_RUN_RE.replace_all(&broken, "\n\n").into_owned();
    Edit {
        text,
        changes: vec!["Added paragraph breaks".into(), "Normalized whitespace".into()],
    }
}

fn expand(original: &str, instructions: Option<&str>) -> Edit {
    let basis = instructions.unwrap_or("general expansion");
    let text = format!(
        "{original}\n\n[EXPANDED CONTENT]\n\
         Additional context and detail would be added here based on: {basis}\n\
         [/EXPANDED CONTENT]"
    );
    Edit {
        text,
        changes: vec![
            "Added expansion placeholder".into(),
            format!("Expansion guidance: {}", instructions.unwrap_or("Add more detail and context")),
        ],
    }
}

fn tone(original: &str, instructions: Option<&str>) -> Edit {
    let target = instructions.unwrap_or("professional").to_lowercase();
    let mut text = original.to_string();
    let mut changes = Vec::new();

    // "informal" contains "formal", so test the casual direction first
    if target.contains("casual") || target.contains("informal") {
        for (short, long) in CONTRACTIONS {
            text = text.replace(long, short);
        }
        changes.push("Added contractions for casual tone".to_string());
    } else if target.contains("formal") {
        for (short, long) in CONTRACTIONS {
            text = text.replace(short, long);
        }
        changes.push("Made contractions formal".to_string());
    }

    changes.push(format!("Adjusted tone toward: {target}"));
    Edit { text, changes }
}

fn style(original: &str, instructions: Option<&str>) -> Edit {
    let changes = match instructions {
        Some(wanted) => vec![
            format!("Style adjustment requested: {wanted}"),
            "Manual review recommended for style changes".to_string(),
        ],
        None => vec!["No specific style instructions provided".to_string()],
    };
    Edit {
        text: original.to_string(),
        changes,
    }
}

fn translate(original: &str, target_language: Option<&str>) -> Edit {
    let lang = target_language.unwrap_or("target language");
    let text = format!(
        "[TRANSLATION TO {}]\n\nOriginal text ({} words):\n{original}\n\n\
         [Translation to {lang} would be inserted here]\n[/TRANSLATION]",
        lang.to_uppercase(),
        word_count(original),
    );
    Edit {
        text,
        changes: vec![
            format!("Marked for translation to: {lang}"),
            "Note: Actual translation requires language processing service".to_string(),
        ],
    }
}

fn custom(original: &str, instructions: Option<&str>) -> Edit {
    let text = format!(
        "[CUSTOM EDIT]\n\nOriginal:\n{original}\n\nInstructions: {}\n\n\
         [Edited version would be inserted here based on instructions]\n[/CUSTOM EDIT]",
        instructions.unwrap_or("No specific instructions provided"),
    );
    Edit {
        text,
        changes: vec![format!(
            "Custom edit requested: {}",
            instructions.unwrap_or("See marked sections")
        )],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexi_core::ids::{SessionId, ToolUseId};
    use tokio_util::sync::CancellationToken;

    async fn run(input: Value) -> Result<ToolOutput, ToolError> {
        let ctx = ToolContext {
            session_id: SessionId::new(),
            tool_use_id: ToolUseId::new(),
            cancel: CancellationToken::new(),
        };
        ApplyEditsTool.execute(input, &ctx).await
    }

    #[test]
    fn grammar_fixes_spacing_and_capitals() {
        let edit = grammar("the tenant  shall pay .rent is due monthly");
        assert_eq!(edit.text, "The tenant shall pay.rent is due monthly");
        assert_eq!(
            edit.changes,
            vec![
                "Removed extra spaces",
                "Fixed spacing around punctuation",
                "Capitalized sentence beginnings"
            ]
        );

        let edit = grammar("Done. next step");
        assert_eq!(edit.text, "Done. Next step");
    }

    #[test]
    fn clean_text_reports_no_grammar_issues() {
        let edit = grammar("All good here.");
        assert_eq!(edit.text, "All good here.");
        assert_eq!(edit.changes, vec!["No grammar issues detected"]);
    }

    #[test]
    fn simplify_replaces_legalese_case_insensitively() {
        let edit = simplify("Prior to closing, the Buyer shall UTILIZE funds pursuant to Section 2.");
        assert_eq!(edit.text, "before closing, the Buyer shall use funds under Section 2.");
        assert_eq!(edit.changes.len(), 3);
        assert!(edit.changes.contains(&"Simplified: 'utilize' → 'use'".to_string()));
    }

    #[test]
    fn format_breaks_sentences_into_paragraphs() {
        let edit = reformat("First clause. Second clause.Third clause.");
        assert_eq!(edit.text, "First clause.\n\nSecond clause.\n\nThird clause.");
    }

    #[test]
    fn tone_direction() {
        assert_eq!(tone("We can't and won't.", Some("Formal")).text, "We cannot and will not.");
        assert_eq!(tone("We cannot and do not.", Some("informal")).text, "We can't and don't.");
        let neutral = tone("We can't.", None);
        assert_eq!(neutral.text, "We can't.");
        assert_eq!(neutral.changes, vec!["Adjusted tone toward: professional"]);
    }

    #[tokio::test]
    async fn result_and_artifact_carry_edited_text() {
        let out = run(json!({
            "original_text": "Clause one.",
            "edit_type": "translate",
            "target_language": "French"
        }))
        .await
        .unwrap();

        let edited = out.artifact.clone().unwrap();
        assert!(edited.starts_with("[TRANSLATION TO FRENCH]"));
        assert!(edited.contains("Original text (2 words):\nClause one."));

        let result: Value = serde_json::from_str(&out.content).unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(result["preserve_meaning"], true);
        assert_eq!(result["original"]["word_count"], 2);
        assert_eq!(result["edited"]["text"], edited);
    }

    #[tokio::test]
    async fn style_keeps_text_and_custom_wraps_it() {
        let out = run(json!({"original_text": "Keep me.", "edit_type": "style", "instructions": "terse"}))
            .await
            .unwrap();
        assert_eq!(out.artifact.as_deref(), Some("Keep me."));

        let out = run(json!({"original_text": "Body", "edit_type": "custom"})).await.unwrap();
        let edited = out.artifact.unwrap();
        assert!(edited.contains("Instructions: No specific instructions provided"));
    }

    #[tokio::test]
    async fn unsupported_edit_type_is_rejected() {
        let err = run(json!({"original_text": "x", "edit_type": "rhyme"})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }
}
