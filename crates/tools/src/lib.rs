//! Function-calling tools
//!
//! Tools expose a name, description, and JSON-schema parameter declaration,
//! aggregated into the function list offered to the LLM. Execution always
//! yields a typed [`ActionResponse`]; tool failures never propagate out of
//! the registry.

pub mod builtin;
mod registry;

pub use registry::{create_default_registry, ToolRegistry};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Tool execution errors.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

/// What the caller should do with a tool result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolAction {
    /// Speak the response directly
    Response,
    /// Feed the result back to the LLM for another turn
    RequestLlm,
    /// No tool with that name is registered
    NotFound,
    /// The tool failed
    Error,
    /// Nothing to do
    None,
}

/// Typed outcome of a tool execution.
#[derive(Debug, Clone)]
pub struct ActionResponse {
    pub action: ToolAction,
    /// User-facing response text
    pub response: Option<String>,
    /// Raw result handed back to the LLM on `RequestLlm`
    pub result: Option<String>,
}

impl ActionResponse {
    pub fn response(text: impl Into<String>) -> Self {
        Self {
            action: ToolAction::Response,
            response: Some(text.into()),
            result: None,
        }
    }

    pub fn request_llm(result: impl Into<String>) -> Self {
        Self {
            action: ToolAction::RequestLlm,
            response: None,
            result: Some(result.into()),
        }
    }

    pub fn not_found(name: &str) -> Self {
        Self {
            action: ToolAction::NotFound,
            response: Some(format!("工具未找到: {name}")),
            result: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            action: ToolAction::Error,
            response: Some(message.into()),
            result: None,
        }
    }
}

/// A callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON-schema parameter declaration.
    fn parameters(&self) -> Value;

    async fn execute(&self, arguments: &Value) -> Result<ActionResponse, ToolError>;
}
