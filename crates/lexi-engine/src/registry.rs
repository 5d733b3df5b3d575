use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde_json::{json, Value};
use tracing::{error, warn};

use lexi_core::ids::ToolUseId;
use lexi_core::messages::{ContentBlock, ToolCall};
use lexi_core::tools::{Tool, ToolContext, ToolDefinition, ToolError, ToolOutput};

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// What one dispatched tool call produced. Failures are folded in as
/// error payloads so the model can react to them.
#[derive(Clone, Debug)]
pub struct ToolOutcome {
    pub tool_use_id: ToolUseId,
    pub name: String,
    pub content: String,
    pub is_error: bool,
    pub artifact: Option<String>,
    pub duration: Duration,
}

impl ToolOutcome {
    pub fn to_block(&self) -> ContentBlock {
        ContentBlock::tool_result(self.tool_use_id.clone(), self.content.clone(), self.is_error)
    }
}

/// Tools by name, plus the dispatcher that runs them.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    timeout: Duration,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(Arc::clone)
    }

    /// Schemas for the model, sorted by name so requests are stable.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Run one tool call. Never fails: unknown tools, bad input, executor
    /// errors, panics and timeouts all become an error outcome.
    pub async fn dispatch(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutcome {
        let start = Instant::now();
        let result = self.execute(call, ctx).await;
        let duration = start.elapsed();

        match result {
            Ok(ToolOutput { content, artifact }) => ToolOutcome {
                tool_use_id: call.id.clone(),
                name: call.name.clone(),
                content,
                is_error: false,
                artifact,
                duration,
            },
            Err(e) => {
                warn!(tool = %call.name, error = %e, "tool call failed");
                ToolOutcome {
                    tool_use_id: call.id.clone(),
                    name: call.name.clone(),
                    content: error_payload(&call.name, &e),
                    is_error: true,
                    artifact: None,
                    duration,
                }
            }
        }
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let tool = self
            .get(&call.name)
            .ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;
        validate_input(&tool.input_schema(), &call.input)?;

        let run = AssertUnwindSafe(tool.execute(call.input.clone(), ctx)).catch_unwind();
        match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => {
                let msg = panic_message(&panic);
                error!(tool = %call.name, panic = %msg, "tool panicked during execution");
                Err(ToolError::Panicked(msg))
            }
            Err(_) => Err(ToolError::Timeout(self.timeout)),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Check `input` against the declared schema: it must be an object, every
/// required field must be present, and typed or enumerated fields must match.
fn validate_input(schema: &Value, input: &Value) -> Result<(), ToolError> {
    let Some(fields) = input.as_object() else {
        return Err(ToolError::InvalidInput("input must be a JSON object".into()));
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if fields.get(name).map_or(true, Value::is_null) {
                return Err(ToolError::MissingInput(name.to_string()));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };
    for (name, value) in fields {
        let Some(schema) = properties.get(name) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        if let Some(expected) = schema.get("type").and_then(Value::as_str) {
            if !matches_type(value, expected) {
                return Err(ToolError::InvalidInput(format!("{name} must be of type {expected}")));
            }
        }
        if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
            if !allowed.contains(value) {
                return Err(ToolError::InvalidInput(format!(
                    "{name} must be one of {}",
                    Value::Array(allowed.clone())
                )));
            }
        }
    }
    Ok(())
}

fn matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

fn error_payload(tool_name: &str, error: &ToolError) -> String {
    let payload = json!({
        "success": false,
        "error": error.to_string(),
        "tool_name": tool_name,
    });
    serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string())
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lexi_core::ids::SessionId;
    use tokio_util::sync::CancellationToken;

    enum Behavior {
        Echo,
        Fail,
        Panic,
        Sleep(Duration),
    }

    struct DummyTool {
        name: String,
        behavior: Behavior,
    }

    impl DummyTool {
        fn new(name: &str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                behavior,
            })
        }
    }

    #[async_trait]
    impl Tool for DummyTool {
        fn name(&self) -> &str {
            &self.name
        }
        fn description(&self) -> &str {
            "A dummy tool for testing"
        }
        fn input_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string"},
                    "mode": {"type": "string", "enum": ["a", "b"]},
                    "limit": {"type": "integer"}
                },
                "required": ["text"]
            })
        }
        async fn execute(&self, input: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
            match self.behavior {
                Behavior::Echo => Ok(ToolOutput::text(input["text"].as_str().unwrap_or_default())),
                Behavior::Fail => Err(ToolError::Execution("disk on fire".into())),
                Behavior::Panic => panic!("boom"),
                Behavior::Sleep(d) => {
                    tokio::time::sleep(d).await;
                    Ok(ToolOutput::text("late"))
                }
            }
        }
    }

    fn ctx() -> ToolContext {
        ToolContext {
            session_id: SessionId::new(),
            tool_use_id: ToolUseId::new(),
            cancel: CancellationToken::new(),
        }
    }

    fn call(name: &str, input: Value) -> ToolCall {
        ToolCall {
            id: ToolUseId::from_raw("toolu_1"),
            name: name.into(),
            input,
        }
    }

    fn payload(outcome: &ToolOutcome) -> Value {
        serde_json::from_str(&outcome.content).unwrap()
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(DummyTool::new("beta", Behavior::Echo));
        registry.register(DummyTool::new("alpha", Behavior::Echo));

        assert!(registry.get("beta").is_some());
        assert!(registry.get("gamma").is_none());
        let defs = registry.definitions();
        assert_eq!(defs[0].name, "alpha");
        assert_eq!(defs[1].name, "beta");
        assert_eq!(defs.len(), 2);
    }

    #[tokio::test]
    async fn successful_dispatch() {
        let mut registry = ToolRegistry::new();
        registry.register(DummyTool::new("echo", Behavior::Echo));

        let outcome = registry.dispatch(&call("echo", json!({"text": "hi"})), &ctx()).await;
        assert!(!outcome.is_error);
        assert_eq!(outcome.content, "hi");
        assert_eq!(outcome.tool_use_id.as_str(), "toolu_1");

        match outcome.to_block() {
            ContentBlock::ToolResult { tool_use_id, is_error, .. } => {
                assert_eq!(tool_use_id.as_str(), "toolu_1");
                assert!(!is_error);
            }
            other => panic!("expected tool_result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_structured_error() {
        let registry = ToolRegistry::new();
        let outcome = registry.dispatch(&call("nope", json!({})), &ctx()).await;
        assert!(outcome.is_error);
        let p = payload(&outcome);
        assert_eq!(p["success"], false);
        assert_eq!(p["error"], "Unknown tool: nope");
        assert_eq!(p["tool_name"], "nope");
    }

    #[tokio::test]
    async fn input_validation() {
        let mut registry = ToolRegistry::new();
        registry.register(DummyTool::new("echo", Behavior::Echo));

        let missing = registry.dispatch(&call("echo", json!({})), &ctx()).await;
        assert!(missing.is_error);
        assert!(payload(&missing)["error"].as_str().unwrap().contains("text"));

        let wrong_type = registry.dispatch(&call("echo", json!({"text": 5})), &ctx()).await;
        assert!(wrong_type.is_error);

        let bad_enum = registry
            .dispatch(&call("echo", json!({"text": "x", "mode": "c"})), &ctx())
            .await;
        assert!(bad_enum.is_error);

        let not_object = registry.dispatch(&call("echo", json!("text")), &ctx()).await;
        assert!(not_object.is_error);

        let ok = registry
            .dispatch(&call("echo", json!({"text": "x", "mode": "b", "limit": 3})), &ctx())
            .await;
        assert!(!ok.is_error);
    }

    #[tokio::test]
    async fn executor_error_and_panic_are_captured() {
        let mut registry = ToolRegistry::new();
        registry.register(DummyTool::new("fail", Behavior::Fail));
        registry.register(DummyTool::new("panic", Behavior::Panic));

        let failed = registry.dispatch(&call("fail", json!({"text": "x"})), &ctx()).await;
        assert!(failed.is_error);
        assert_eq!(payload(&failed)["error"], "disk on fire");

        let panicked = registry.dispatch(&call("panic", json!({"text": "x"})), &ctx()).await;
        assert!(panicked.is_error);
        assert!(payload(&panicked)["error"].as_str().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn slow_tool_times_out() {
        tokio::time::pause();
        let mut registry = ToolRegistry::new().with_timeout(Duration::from_secs(1));
        registry.register(DummyTool::new("slow", Behavior::Sleep(Duration::from_secs(5))));

        let outcome = registry.dispatch(&call("slow", json!({"text": "x"})), &ctx()).await;
        assert!(outcome.is_error);
        assert_eq!(payload(&outcome)["error"], "tool timed out after 1s");
    }
}
