//! Tool trait and registry
//!
//! Tools are the model's only way to reach grounding sources. Each declares
//! a name, a description, and a typed argument schema; the registry
//! validates arguments before invocation and turns every failure
//! (unknown name, schema mismatch, handler error) into a failed ToolResult
//! so the model can adapt. Dispatch never raises past the registry.

pub mod knowledge;
pub mod market;

use crate::error::{CoreError, Result};
use crate::models::{Citation, ToolCall, ToolResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

//
// ================= Argument schemas =================
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    String,
    Number,
    Bool,
}

#[derive(Debug, Clone)]
pub struct ArgField {
    pub name: &'static str,
    pub kind: ArgKind,
    pub required: bool,
    /// Closed value set for enum-like string args, empty when unrestricted
    pub one_of: &'static [&'static str],
    pub description: &'static str,
}

impl ArgField {
    pub fn required_string(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            kind: ArgKind::String,
            required: true,
            one_of: &[],
            description,
        }
    }

    pub fn optional_choice(
        name: &'static str,
        one_of: &'static [&'static str],
        description: &'static str,
    ) -> Self {
        Self {
            name,
            kind: ArgKind::String,
            required: false,
            one_of,
            description,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ArgSchema {
    pub fields: Vec<ArgField>,
}

impl ArgSchema {
    pub fn new(fields: Vec<ArgField>) -> Self {
        Self { fields }
    }

    /// Validate an argument object against the declared field set.
    pub fn validate(&self, args: &Value) -> Result<()> {
        let Some(object) = args.as_object() else {
            return Err(CoreError::InvalidToolArgs(
                "arguments must be a JSON object".to_string(),
            ));
        };

        for field in &self.fields {
            match object.get(field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        return Err(CoreError::InvalidToolArgs(format!(
                            "missing required argument '{}'",
                            field.name
                        )));
                    }
                }
                Some(value) => {
                    let ok = match field.kind {
                        ArgKind::String => value.is_string(),
                        ArgKind::Number => value.is_number(),
                        ArgKind::Bool => value.is_boolean(),
                    };
                    if !ok {
                        return Err(CoreError::InvalidToolArgs(format!(
                            "argument '{}' has the wrong type",
                            field.name
                        )));
                    }
                    if !field.one_of.is_empty() {
                        let s = value.as_str().unwrap_or_default();
                        if !field.one_of.contains(&s) {
                            return Err(CoreError::InvalidToolArgs(format!(
                                "argument '{}' must be one of {:?}",
                                field.name, field.one_of
                            )));
                        }
                    }
                }
            }
        }

        if let Some(unknown) = object
            .keys()
            .find(|k| !self.fields.iter().any(|f| f.name == k.as_str()))
        {
            return Err(CoreError::InvalidToolArgs(format!(
                "unknown argument '{}'",
                unknown
            )));
        }

        Ok(())
    }
}

//
// ================= Tool contract =================
//

/// Handler output: a structured payload plus optional source citations.
#[derive(Debug, Clone)]
pub struct ToolPayload {
    pub payload: Value,
    pub citations: Vec<Citation>,
}

impl ToolPayload {
    pub fn data(payload: Value) -> Self {
        Self {
            payload,
            citations: Vec::new(),
        }
    }
}

#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn schema(&self) -> ArgSchema;
    async fn execute(&self, args: &Value) -> Result<ToolPayload>;
}

/// Model-visible declaration of one tool, exported to the gateway.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

fn schema_to_json(schema: &ArgSchema) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for field in &schema.fields {
        let kind = match field.kind {
            ArgKind::String => "string",
            ArgKind::Number => "number",
            ArgKind::Bool => "boolean",
        };
        let mut prop = serde_json::Map::new();
        prop.insert("type".to_string(), Value::String(kind.to_string()));
        prop.insert(
            "description".to_string(),
            Value::String(field.description.to_string()),
        );
        if !field.one_of.is_empty() {
            prop.insert(
                "enum".to_string(),
                Value::Array(
                    field
                        .one_of
                        .iter()
                        .map(|v| Value::String(v.to_string()))
                        .collect(),
                ),
            );
        }
        properties.insert(field.name.to_string(), Value::Object(prop));
        if field.required {
            required.push(Value::String(field.name.to_string()));
        }
    }

    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

//
// ================= Registry =================
//

pub struct ToolRegistry {
    tools: HashMap<&'static str, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Names are unique; a duplicate registration is a programming error.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name();
        if self.tools.insert(name, tool).is_some() {
            panic!("duplicate tool registration: {}", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.tools.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Declared capability set, sorted by name for a stable prompt.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .values()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: schema_to_json(&t.schema()),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Execute one ToolCall. Always produces a ToolResult with the same
    /// correlation id; failures are carried in the result, never thrown.
    pub async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.get(&call.name) else {
            warn!(tool = %call.name, "Dispatch of unknown tool");
            return ToolResult::failed(call.id, "tool_not_found", &call.name);
        };

        if let Err(e) = tool.schema().validate(&call.arguments) {
            warn!(tool = %call.name, error = %e, "Tool argument validation failed");
            return ToolResult::failed(call.id, "invalid_tool_args", e);
        }

        debug!(tool = %call.name, call_id = %call.id, "Dispatching tool");
        match tool.execute(&call.arguments).await {
            Ok(output) => ToolResult::ok(call.id, output.payload, output.citations),
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool execution failed");
                ToolResult::failed(call.id, "tool_execution_failed", e)
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    struct EchoTool;

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &'static str {
            "echo"
        }
        fn description(&self) -> &'static str {
            "Echo the query back"
        }
        fn schema(&self) -> ArgSchema {
            ArgSchema::new(vec![ArgField::required_string("query", "Text to echo")])
        }
        async fn execute(&self, args: &Value) -> Result<ToolPayload> {
            Ok(ToolPayload::data(json!({ "echo": args["query"] })))
        }
    }

    struct FailingTool;

    #[async_trait::async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &'static str {
            "flaky"
        }
        fn description(&self) -> &'static str {
            "Always fails"
        }
        fn schema(&self) -> ArgSchema {
            ArgSchema::default()
        }
        async fn execute(&self, _args: &Value) -> Result<ToolPayload> {
            Err(CoreError::ToolExecutionFailed("upstream timeout".to_string()))
        }
    }

    fn registry() -> ToolRegistry {
        let mut r = ToolRegistry::new();
        r.register(Arc::new(EchoTool));
        r.register(Arc::new(FailingTool));
        r
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: Uuid::new_v4(),
            name: name.to_string(),
            arguments: args,
        }
    }

    #[tokio::test]
    async fn test_dispatch_success_preserves_correlation() {
        let r = registry();
        let c = call("echo", json!({ "query": "hello" }));
        let result = r.dispatch(&c).await;
        assert_eq!(result.call_id, c.id);
        assert!(result.success);
        assert_eq!(result.payload["echo"], "hello");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_failed_result_not_error() {
        let r = registry();
        let c = call("nonexistent", json!({}));
        let result = r.dispatch(&c).await;
        assert!(!result.success);
        assert_eq!(result.payload["error"], "tool_not_found");
        assert_eq!(result.call_id, c.id);
    }

    #[tokio::test]
    async fn test_schema_mismatch_is_failed_result() {
        let r = registry();

        let missing = r.dispatch(&call("echo", json!({}))).await;
        assert!(!missing.success);
        assert_eq!(missing.payload["error"], "invalid_tool_args");

        let wrong_type = r.dispatch(&call("echo", json!({ "query": 7 }))).await;
        assert!(!wrong_type.success);

        let unknown_key = r
            .dispatch(&call("echo", json!({ "query": "x", "extra": true })))
            .await;
        assert!(!unknown_key.success);
    }

    #[tokio::test]
    async fn test_handler_error_is_failed_result() {
        let r = registry();
        let result = r.dispatch(&call("flaky", json!({}))).await;
        assert!(!result.success);
        assert_eq!(result.payload["error"], "tool_execution_failed");
    }

    #[test]
    fn test_specs_sorted_and_typed() {
        let specs = registry().specs();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].name, "echo");
        assert_eq!(specs[1].name, "flaky");
        assert_eq!(specs[0].parameters["required"][0], "query");
        assert_eq!(specs[0].parameters["properties"]["query"]["type"], "string");
    }

    #[test]
    fn test_choice_field_validation() {
        let schema = ArgSchema::new(vec![ArgField::optional_choice(
            "period",
            &["1wk", "1mo"],
            "Analysis period",
        )]);
        assert!(schema.validate(&json!({})).is_ok());
        assert!(schema.validate(&json!({ "period": "1wk" })).is_ok());
        assert!(schema.validate(&json!({ "period": "2y" })).is_err());
    }
}
