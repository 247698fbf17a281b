//! Tool registry used by the tool-using agent
//!
//! The registry is an ordinary value built at startup and owned by the agent
//! that uses it.

pub mod builtin;
pub mod expression;

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by tools and tool lookup
#[derive(Debug, Error)]
pub enum ToolError {
    /// Tool not found
    #[error("Tool not found: {0}")]
    NotFound(String),

    /// Missing or malformed argument
    #[error("Invalid argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },

    /// Tool ran but could not produce a result
    #[error("{0}")]
    Execution(String),
}

impl ToolError {
    pub fn invalid(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

pub type ToolResult<T> = Result<T, ToolError>;

/// A named function callable with JSON arguments
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Grouping used when listing tools
    fn category(&self) -> &str;

    /// JSON Schema of the arguments object
    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    fn call(&self, args: &Value) -> ToolResult<Value>;
}

/// Tools by name
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every bundled tool
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for tool in builtin::all() {
            registry.register(tool);
        }
        registry
    }

    /// Add a tool, replacing any tool with the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> ToolResult<Arc<dyn Tool>> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    pub fn call(&self, name: &str, args: &Value) -> ToolResult<Value> {
        let tool = self.get(name)?;
        tracing::debug!("Calling tool {} with {}", name, args);
        tool.call(args)
    }

    /// Tool names in alphabetical order
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Name, description, category and parameter schema of every tool
    pub fn list(&self) -> Vec<Value> {
        self.tools
            .values()
            .map(|t| {
                json!({
                    "name": t.name(),
                    "description": t.description(),
                    "category": t.category(),
                    "parameters": t.parameters(),
                })
            })
            .collect()
    }

    /// Distinct categories, sorted
    pub fn categories(&self) -> Vec<String> {
        let mut categories: Vec<String> = self.tools.values().map(|t| t.category().to_string()).collect();
        categories.sort();
        categories.dedup();
        categories
    }

    pub fn by_category(&self, category: &str) -> Vec<Arc<dyn Tool>> {
        self.tools
            .values()
            .filter(|t| t.category() == category)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Read a required string argument
pub(crate) fn str_arg<'a>(args: &'a Value, name: &str) -> ToolResult<&'a str> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::invalid(name, "expected a string"))
}

/// Read a numeric argument, falling back to `default` when absent
pub(crate) fn number_arg(args: &Value, name: &str, default: Option<f64>) -> ToolResult<f64> {
    match args.get(name) {
        Some(value) => value
            .as_f64()
            .ok_or_else(|| ToolError::invalid(name, "expected a number")),
        None => default.ok_or_else(|| ToolError::invalid(name, "missing")),
    }
}

/// Read an integer argument, falling back to `default` when absent
pub(crate) fn int_arg(args: &Value, name: &str, default: Option<i64>) -> ToolResult<i64> {
    match args.get(name) {
        Some(value) => value
            .as_i64()
            .ok_or_else(|| ToolError::invalid(name, "expected an integer")),
        None => default.ok_or_else(|| ToolError::invalid(name, "missing")),
    }
}
