//! Dialogue history
//!
//! Append-only, role-tagged conversation history owned by a single session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ToolCall;

/// Message role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single role-tagged message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl DialogueMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }

    /// An assistant message carrying tool calls.
    pub fn assistant_tool_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: Some(calls),
            ..Self::new(Role::Assistant, content)
        }
    }

    /// A tool result message answering a specific tool call.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }
}

/// Ordered conversation history, append-only during the session.
#[derive(Debug, Default)]
pub struct Dialogue {
    messages: Vec<DialogueMessage>,
}

impl Dialogue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the dialogue with a system prompt.
    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        let mut dialogue = Self::new();
        if !prompt.is_empty() {
            dialogue.push(DialogueMessage::new(Role::System, prompt));
        }
        dialogue
    }

    pub fn push(&mut self, message: DialogueMessage) {
        self.messages.push(message);
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.push(DialogueMessage::new(Role::User, text));
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.push(DialogueMessage::new(Role::Assistant, text));
    }

    pub fn messages(&self) -> &[DialogueMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Build the message list handed to the LLM: system prompt first,
    /// then an optional memory context block, then the rest of the history.
    pub fn for_llm(&self, memory: Option<&str>) -> Vec<DialogueMessage> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);

        if let Some(first) = self.messages.first() {
            if first.role == Role::System {
                out.push(first.clone());
            }
        }

        if let Some(memory) = memory {
            if !memory.trim().is_empty() {
                out.push(DialogueMessage::new(
                    Role::System,
                    format!("[记忆上下文]\n{memory}"),
                ));
            }
        }

        for message in &self.messages {
            if message.role != Role::System {
                out.push(message.clone());
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialogue_append_order() {
        let mut dialogue = Dialogue::new();
        dialogue.push_user("你好");
        dialogue.push_assistant("你好呀");
        dialogue.push_user("今天天气怎么样");

        let roles: Vec<Role> = dialogue.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
    }

    #[test]
    fn test_for_llm_keeps_system_first() {
        let mut dialogue = Dialogue::with_system_prompt("你是一个语音助手");
        dialogue.push_user("hello");

        let messages = dialogue.for_llm(None);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].role, Role::User);
    }

    #[test]
    fn test_for_llm_injects_memory_context() {
        let mut dialogue = Dialogue::with_system_prompt("prompt");
        dialogue.push_user("hi");

        let messages = dialogue.for_llm(Some("用户喜欢爵士乐"));
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].role, Role::System);
        assert!(messages[1].content.contains("用户喜欢爵士乐"));
    }

    #[test]
    fn test_for_llm_skips_blank_memory() {
        let mut dialogue = Dialogue::new();
        dialogue.push_user("hi");
        assert_eq!(dialogue.for_llm(Some("   ")).len(), 1);
    }
}
