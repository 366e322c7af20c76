//! The capability every registered tool exposes to the dispatch loop.

use async_trait::async_trait;
use gemini_realtime::ToolDeclaration;
use serde_json::Value;
use thiserror::Error;

/// Failures raised while running a tool.
///
/// None of these ever leave the dispatch loop: each one becomes the `error`
/// field of the call's response.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ToolError {
    /// The arguments were missing, of the wrong type, or malformed.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The tool understood the request but could not complete it.
    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),
}

/// A tool the model can call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Tool: Send + Sync {
    /// The schema advertised in the setup message.
    fn declaration(&self) -> ToolDeclaration;

    /// Extra call names that route to this tool, e.g. a function name that
    /// differs from the registry key.
    fn aliases(&self) -> Vec<String> {
        Vec::new()
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError>;
}

/// Reads a required, non-empty string argument.
pub(crate) fn required_str<'a>(args: &'a Value, field: &str) -> Result<&'a str, ToolError> {
    match args.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim()),
        Some(Value::String(_)) => Err(ToolError::InvalidParameter(format!(
            "'{field}' must not be empty"
        ))),
        Some(other) => Err(ToolError::InvalidParameter(format!(
            "'{field}' must be a string, got {other}"
        ))),
        None => Err(ToolError::InvalidParameter(format!("missing '{field}'"))),
    }
}
