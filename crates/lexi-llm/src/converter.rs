use serde_json::{json, Value};

use lexi_core::provider::{ModelRequest, StreamOptions};

/// Convert a round's request into the Messages API request body.
pub fn build_request_body(request: &ModelRequest, options: &StreamOptions, model: &str) -> Value {
    let mut body = json!({
        "model": model,
        "max_tokens": options.max_tokens,
        "stream": true,
        "messages": request.messages,
    });

    if let Some(temp) = options.temperature {
        body["temperature"] = json!(temp);
    }

    if !request.system.is_empty() {
        body["system"] = json!(request.system);
    }

    if !request.tools.is_empty() {
        body["tools"] = json!(request.tools);
    }

    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexi_core::messages::Message;
    use lexi_core::tools::ToolDefinition;

    #[test]
    fn minimal_body() {
        let request = ModelRequest {
            messages: vec![Message::user_text("hi")],
            ..Default::default()
        };
        let body = build_request_body(&request, &StreamOptions::default(), "claude-test");
        assert_eq!(body["model"], "claude-test");
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["content"], "hi");
        assert!(body.get("system").is_none());
        assert!(body.get("tools").is_none());
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn system_tools_and_temperature() {
        let request = ModelRequest {
            system: "You are helpful.".into(),
            tools: vec![ToolDefinition {
                name: "apply_edits".into(),
                description: "Edit text".into(),
                input_schema: json!({"type": "object"}),
            }],
            messages: vec![Message::user_text("hi")],
        };
        let options = StreamOptions {
            max_tokens: 1024,
            temperature: Some(0.5),
        };
        let body = build_request_body(&request, &options, "m");
        assert_eq!(body["system"], "You are helpful.");
        assert_eq!(body["tools"][0]["name"], "apply_edits");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(body["temperature"], 0.5);
        assert_eq!(body["max_tokens"], 1024);
    }
}
