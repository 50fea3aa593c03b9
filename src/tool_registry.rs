//! The Tool Registry: a name-addressed catalog of invocable tools.
//!
//! Mirrors the toolkit's `ToolProtocol`/`Tool` builder pattern, generalized
//! to the spec's single-process catalog with capability and category
//! secondary indexes and multi-dialect schema export.
//!
//! # Example
//!
//! ```rust
//! use timus_orchestrator::tool_registry::{
//!     ToolCategory, ToolHandler, ToolParameter, ToolParameterType, ToolRegistry,
//! };
//! use async_trait::async_trait;
//! use serde_json::Value;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl ToolHandler for Echo {
//!     async fn call(&self, params: Value) -> Result<Value, String> {
//!         Ok(params)
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = ToolRegistry::new();
//! registry.register(
//!     "echo",
//!     "Echoes its input back",
//!     vec![ToolParameter::new("text", ToolParameterType::String).required(true)],
//!     vec!["utility".to_string()],
//!     ToolCategory::Utility,
//!     std::sync::Arc::new(Echo),
//! )?;
//! assert!(registry.get_tool("echo").is_some());
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::CoreError;

/// The declared semantic type of a [`ToolParameter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolParameterType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ToolParameterType {
    /// Whether `value` is compatible with this declared type.
    ///
    /// Integers are accepted wherever a `Number` is declared (a JSON
    /// integer is a number), but not the reverse: a declared `Integer`
    /// parameter rejects a fractional `Number`.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ToolParameterType::String => value.is_string(),
            ToolParameterType::Integer => value.as_i64().is_some() || value.as_u64().is_some(),
            ToolParameterType::Number => value.is_number(),
            ToolParameterType::Boolean => value.is_boolean(),
            ToolParameterType::Array => value.is_array(),
            ToolParameterType::Object => value.is_object(),
        }
    }

    fn json_schema_type(&self) -> &'static str {
        match self {
            ToolParameterType::String => "string",
            ToolParameterType::Integer => "integer",
            ToolParameterType::Number => "number",
            ToolParameterType::Boolean => "boolean",
            ToolParameterType::Array => "array",
            ToolParameterType::Object => "object",
        }
    }
}

/// A category a [`Tool`] is classified under, used as a secondary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Utility,
    Information,
    Communication,
    System,
    Delegation,
    Other,
}

impl fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ToolCategory::Utility => "utility",
            ToolCategory::Information => "information",
            ToolCategory::Communication => "communication",
            ToolCategory::System => "system",
            ToolCategory::Delegation => "delegation",
            ToolCategory::Other => "other",
        };
        write!(f, "{}", s)
    }
}

/// A single declared parameter of a [`Tool`].
#[derive(Debug, Clone)]
pub struct ToolParameter {
    pub name: String,
    pub description: String,
    pub param_type: ToolParameterType,
    pub required: bool,
    pub default: Option<Value>,
}

impl ToolParameter {
    /// Start building a parameter with the given name and type.
    /// Defaults to `required(false)` with no description or default.
    pub fn new(name: impl Into<String>, param_type: ToolParameterType) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            param_type,
            required: false,
            default: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Async handler invoked when a tool is called. Implementors perform the
/// tool's actual work; concrete implementations (file I/O, search,
/// browser automation, etc.) are out of scope for this crate.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the tool with the given JSON parameters, returning a JSON
    /// result or a human-readable error message.
    async fn call(&self, params: Value) -> Result<Value, String>;
}

/// A named, invocable operation.
#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
    pub capabilities: Vec<String>,
    pub category: ToolCategory,
    pub handler: Arc<dyn ToolHandler>,
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .field("capabilities", &self.capabilities)
            .field("category", &self.category)
            .finish()
    }
}

impl Tool {
    fn required_params(&self) -> impl Iterator<Item = &ToolParameter> {
        self.parameters.iter().filter(|p| p.required)
    }

    fn find_param(&self, name: &str) -> Option<&ToolParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// Process-wide catalog of [`Tool`]s, indexed by name, capability tag, and
/// category.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Tool>,
    by_capability: HashMap<String, Vec<String>>,
    by_category: HashMap<ToolCategory, Vec<String>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Duplicate names fail fast with
    /// [`CoreError::ValidationError`] rather than silently overwriting —
    /// unlike the toolkit's multi-protocol registry where a later protocol
    /// is allowed to win, the spec requires name uniqueness across the
    /// whole registry.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Vec<ToolParameter>,
        capabilities: Vec<String>,
        category: ToolCategory,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), CoreError> {
        let name = name.into();
        if self.tools.contains_key(&name) {
            return Err(CoreError::ValidationError {
                tool: name.clone(),
                message: format!("tool '{}' is already registered", name),
            });
        }

        for tag in &capabilities {
            self.by_capability
                .entry(tag.clone())
                .or_default()
                .push(name.clone());
        }
        self.by_category.entry(category).or_default().push(name.clone());

        self.tools.insert(
            name.clone(),
            Tool {
                name,
                description: description.into(),
                parameters,
                capabilities,
                category,
                handler,
            },
        );
        Ok(())
    }

    pub fn get_tool(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn list_all_tools(&self) -> &HashMap<String, Tool> {
        &self.tools
    }

    pub fn get_tools_by_capability(&self, tag: &str) -> Vec<&Tool> {
        self.by_capability
            .get(tag)
            .into_iter()
            .flatten()
            .filter_map(|name| self.tools.get(name))
            .collect()
    }

    pub fn get_tools_by_category(&self, category: ToolCategory) -> Vec<&Tool> {
        self.by_category
            .get(&category)
            .into_iter()
            .flatten()
            .filter_map(|name| self.tools.get(name))
            .collect()
    }

    /// Validate a prospective call against the declared tool signature.
    ///
    /// Checks, in order: tool exists; every required parameter is present;
    /// every supplied parameter is declared; every supplied parameter's
    /// value matches its declared type.
    pub fn validate_tool_call(&self, name: &str, params: &Value) -> Result<(), CoreError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| CoreError::ToolNotFound(name.to_string()))?;

        let empty = serde_json::Map::new();
        let supplied = params.as_object().unwrap_or(&empty);

        for required in tool.required_params() {
            if !supplied.contains_key(&required.name) {
                return Err(CoreError::ValidationError {
                    tool: name.to_string(),
                    message: format!("missing required parameter '{}'", required.name),
                });
            }
        }

        for (key, value) in supplied {
            let declared = tool.find_param(key).ok_or_else(|| CoreError::ValidationError {
                tool: name.to_string(),
                message: format!("unknown parameter '{}'", key),
            })?;
            if !declared.param_type.accepts(value) {
                return Err(CoreError::ValidationError {
                    tool: name.to_string(),
                    message: format!(
                        "parameter '{}' expected type {:?}, got {}",
                        key, declared.param_type, value
                    ),
                });
            }
        }

        Ok(())
    }

    /// Invoke a tool's handler after validating the call.
    pub async fn execute_tool(&self, name: &str, params: Value) -> Result<Value, CoreError> {
        self.validate_tool_call(name, &params)?;
        let tool = self.tools.get(name).expect("validated above");
        tool.handler
            .call(params)
            .await
            .map_err(CoreError::HandlerError)
    }

    /// Human-readable catalog for inclusion in agent prompts.
    pub fn get_tool_manifest(&self) -> String {
        let mut names: Vec<&String> = self.tools.keys().collect();
        names.sort();
        let mut manifest = String::new();
        for name in names {
            let tool = &self.tools[name];
            manifest.push_str(&format!("- {}: {}\n", tool.name, tool.description));
            for param in &tool.parameters {
                manifest.push_str(&format!(
                    "    {} ({:?}{}): {}\n",
                    param.name,
                    param.param_type,
                    if param.required { ", required" } else { "" },
                    param.description
                ));
            }
        }
        manifest
    }

    /// OpenAI function-calling schema dialect.
    pub fn get_openai_tools_schema(&self) -> Vec<Value> {
        let mut names: Vec<&String> = self.tools.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| {
                let tool = &self.tools[name];
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": parameters_json_schema(tool),
                    }
                })
            })
            .collect()
    }

    /// Anthropic tool-use schema dialect.
    pub fn get_anthropic_tools_schema(&self) -> Vec<Value> {
        let mut names: Vec<&String> = self.tools.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| {
                let tool = &self.tools[name];
                serde_json::json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": parameters_json_schema(tool),
                })
            })
            .collect()
    }
}

fn parameters_json_schema(tool: &Tool) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for param in &tool.parameters {
        properties.insert(
            param.name.clone(),
            serde_json::json!({
                "type": param.param_type.json_schema_type(),
                "description": param.description,
            }),
        );
        if param.required {
            required.push(Value::String(param.name.clone()));
        }
    }
    serde_json::json!({
        "type": "object",
        "properties": Value::Object(properties),
        "required": required,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn call(&self, params: Value) -> Result<Value, String> {
            Ok(params)
        }
    }

    fn registry_with_echo() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry
            .register(
                "echo",
                "Echoes its input",
                vec![ToolParameter::new("text", ToolParameterType::String).required(true)],
                vec!["utility".to_string()],
                ToolCategory::Utility,
                Arc::new(Echo),
            )
            .unwrap();
        registry
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut registry = registry_with_echo();
        let result = registry.register(
            "echo",
            "Another echo",
            vec![],
            vec![],
            ToolCategory::Utility,
            Arc::new(Echo),
        );
        assert!(result.is_err());
    }

    #[test]
    fn validation_rejects_missing_required_param() {
        let registry = registry_with_echo();
        let err = registry
            .validate_tool_call("echo", &serde_json::json!({}))
            .unwrap_err();
        assert_eq!(err.rpc_code(), -32602);
    }

    #[test]
    fn validation_rejects_unknown_param() {
        let registry = registry_with_echo();
        let err = registry
            .validate_tool_call("echo", &serde_json::json!({"text": "hi", "bogus": 1}))
            .unwrap_err();
        assert_eq!(err.rpc_code(), -32602);
    }

    #[test]
    fn validation_rejects_wrong_type() {
        let registry = registry_with_echo();
        let err = registry
            .validate_tool_call("echo", &serde_json::json!({"text": 5}))
            .unwrap_err();
        assert_eq!(err.rpc_code(), -32602);
    }

    #[test]
    fn validation_passes_for_well_formed_call() {
        let registry = registry_with_echo();
        assert!(registry
            .validate_tool_call("echo", &serde_json::json!({"text": "hi"}))
            .is_ok());
    }

    #[test]
    fn unknown_tool_is_tool_not_found() {
        let registry = registry_with_echo();
        let err = registry
            .validate_tool_call("ghost", &serde_json::json!({}))
            .unwrap_err();
        assert_eq!(err.rpc_code(), -32601);
    }

    #[tokio::test]
    async fn execute_tool_runs_handler() {
        let registry = registry_with_echo();
        let result = registry
            .execute_tool("echo", serde_json::json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({"text": "hi"}));
    }

    #[test]
    fn capability_index_returns_registered_tools() {
        let registry = registry_with_echo();
        let tools = registry.get_tools_by_capability("utility");
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
    }

    #[test]
    fn openai_schema_includes_required_list() {
        let registry = registry_with_echo();
        let schema = registry.get_openai_tools_schema();
        assert_eq!(schema.len(), 1);
        let required = &schema[0]["function"]["parameters"]["required"];
        assert_eq!(required, &serde_json::json!(["text"]));
    }
}
