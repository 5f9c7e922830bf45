//! Named tool table.
//!
//! Registration is idempotent by name: re-registering a name replaces the
//! previous entry and logs a warning. Execution is pure dispatch — the
//! registry doesn't interpret a tool's output, it just runs the executor
//! and hands back whatever it returned. Tools that merely forward an
//! invocation to some other process (e.g. a desktop shell) are ordinary
//! registrations whose executor's output happens to be a marker the
//! caller recognizes; the registry has no special-cased notion of a
//! "forwarding tool."

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::ai::NativeToolSpec;

pub type ToolExecutor = Arc<dyn Fn(&Value) -> ToolResult + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ToolResult {
    pub output: String,
    pub is_error: bool,
    pub exit_code: i32,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self { output: output.into(), is_error: false, exit_code: 0 }
    }

    pub fn error(output: impl Into<String>, exit_code: i32) -> Self {
        Self { output: output.into(), is_error: true, exit_code }
    }
}

#[derive(Clone)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub input_schema: String,
    pub requires_sandbox: bool,
    pub requires_confirmation: bool,
    pub executor: ToolExecutor,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDef>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    pub fn register(&mut self, def: ToolDef) {
        if self.tools.contains_key(&def.name) {
            tracing::warn!(tool = %def.name, "replacing existing tool registration");
        }
        self.tools.insert(def.name.clone(), def);
    }

    pub fn execute(&self, name: &str, args: &Value) -> ToolResult {
        match self.tools.get(name) {
            Some(def) => (def.executor)(args),
            None => ToolResult::error(format!("error: unknown tool '{name}'"), -1),
        }
    }

    /// Anthropic tool-use catalog shape: `[{name, description, input_schema}, ...]`.
    pub fn catalog(&self) -> Value {
        let entries: Vec<Value> = self
            .tools
            .values()
            .map(|def| {
                let schema = serde_json::from_str::<Value>(&def.input_schema).unwrap_or_else(|_| json!({}));
                json!({
                    "name": def.name,
                    "description": def.description,
                    "input_schema": schema,
                })
            })
            .collect();
        Value::Array(entries)
    }

    /// The same catalog, typed for handing straight to a provider adapter
    /// as `ChatRequest.tools`.
    pub fn native_specs(&self) -> Vec<NativeToolSpec> {
        self.tools
            .values()
            .map(|def| NativeToolSpec {
                name: def.name.clone(),
                description: def.description.clone(),
                input_schema: serde_json::from_str(&def.input_schema).unwrap_or_else(|_| json!({})),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_tool(name: &str) -> ToolDef {
        ToolDef {
            name: name.to_string(),
            description: "a test tool".to_string(),
            input_schema: r#"{"type":"object","properties":{}}"#.to_string(),
            requires_sandbox: false,
            requires_confirmation: false,
            executor: Arc::new(|_args| ToolResult::ok("done")),
        }
    }

    #[test]
    fn unknown_tool_returns_error_shape() {
        let registry = ToolRegistry::new();
        let result = registry.execute("nope", &json!({}));
        assert!(result.is_error);
        assert_eq!(result.exit_code, -1);
        assert_eq!(result.output, "error: unknown tool 'nope'");
    }

    #[test]
    fn re_registration_replaces_entry() {
        let mut registry = ToolRegistry::new();
        registry.register(noop_tool("echo"));
        assert_eq!(registry.len(), 1);

        let mut replacement = noop_tool("echo");
        replacement.description = "replaced".to_string();
        registry.register(replacement);

        assert_eq!(registry.len(), 1);
        let catalog = registry.catalog();
        assert_eq!(catalog[0]["description"], "replaced");
    }

    #[test]
    fn native_specs_mirror_the_catalog() {
        let mut registry = ToolRegistry::new();
        registry.register(noop_tool("echo"));
        let specs = registry.native_specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "echo");
        assert_eq!(specs[0].input_schema, json!({"type":"object","properties":{}}));
    }

    #[test]
    fn malformed_schema_falls_back_to_empty_object() {
        let mut registry = ToolRegistry::new();
        let mut def = noop_tool("broken");
        def.input_schema = "not json".to_string();
        registry.register(def);
        let catalog = registry.catalog();
        assert_eq!(catalog[0]["input_schema"], json!({}));
    }
}
