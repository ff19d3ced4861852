//! Tool registry and executor

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use voiceline_core::FunctionDef;

use crate::builtin::{ExitIntentTool, PlayMusicTool, WeatherTool};
use crate::{ActionResponse, Tool, ToolError};

/// Named registry of tools, shared across sessions.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.write().insert(name.clone(), tool);
        tracing::info!("Registered tool: {name}");
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.read().keys().cloned().collect()
    }

    /// Function declarations for the LLM function list.
    pub fn function_defs(&self) -> Vec<FunctionDef> {
        self.tools
            .read()
            .values()
            .map(|tool| FunctionDef {
                name: tool.name().to_string(),
                description: Some(tool.description().to_string()),
                parameters: tool.parameters(),
            })
            .collect()
    }

    /// Execute a tool by name. Never fails: an unknown name becomes the
    /// `NotFound` action and execution errors become the `Error` action.
    pub async fn execute(&self, name: &str, arguments: &Value) -> ActionResponse {
        let tool = {
            let tools = self.tools.read();
            tools.get(name).cloned()
        };

        let Some(tool) = tool else {
            tracing::warn!("Tool not found: {name}");
            return ActionResponse::not_found(name);
        };

        match tool.execute(arguments).await {
            Ok(response) => response,
            Err(ToolError::InvalidParams(message)) => {
                tracing::warn!("Tool {name} rejected arguments: {message}");
                ActionResponse::error(format!("参数错误: {message}"))
            }
            Err(ToolError::ExecutionFailed(message)) => {
                tracing::error!("Tool {name} failed: {message}");
                ActionResponse::error(format!("工具执行失败: {message}"))
            }
        }
    }
}

/// Registry preloaded with the builtin tools.
pub fn create_default_registry() -> ToolRegistry {
    let registry = ToolRegistry::new();
    registry.register(Arc::new(WeatherTool));
    registry.register(Arc::new(PlayMusicTool));
    registry.register(Arc::new(ExitIntentTool));
    registry
}
