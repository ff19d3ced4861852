//! Memory providers

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use voiceline_core::{DialogueMessage, Role};

use crate::{MemoryProvider, ProviderError};

/// Memory provider that remembers nothing.
pub struct NoMemory;

#[async_trait]
impl MemoryProvider for NoMemory {
    async fn init_memory(
        &self,
        _role_id: &str,
        _summary_config: Option<&serde_json::Value>,
    ) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn save_memory(
        &self,
        _dialogue: &[DialogueMessage],
        _session_id: &str,
    ) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn query_memory(&self, _query: &str) -> Result<Option<String>, ProviderError> {
        Ok(None)
    }
}

/// Short-term in-process memory: keeps the most recent user/assistant
/// exchanges and answers queries by substring match.
pub struct LocalShortMemory {
    max_entries: usize,
    entries: Mutex<VecDeque<String>>,
}

impl LocalShortMemory {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }
}

#[async_trait]
impl MemoryProvider for LocalShortMemory {
    async fn init_memory(
        &self,
        role_id: &str,
        _summary_config: Option<&serde_json::Value>,
    ) -> Result<(), ProviderError> {
        tracing::debug!("Local memory initialized for role {role_id}");
        Ok(())
    }

    async fn save_memory(
        &self,
        dialogue: &[DialogueMessage],
        session_id: &str,
    ) -> Result<(), ProviderError> {
        let mut entries = self.entries.lock();
        for message in dialogue {
            if matches!(message.role, Role::User | Role::Assistant) && !message.content.is_empty() {
                entries.push_back(message.content.clone());
                if entries.len() > self.max_entries {
                    entries.pop_front();
                }
            }
        }
        tracing::debug!(
            "Saved {} dialogue messages from session {session_id}",
            dialogue.len()
        );
        Ok(())
    }

    async fn query_memory(&self, query: &str) -> Result<Option<String>, ProviderError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(None);
        }
        let entries = self.entries.lock();
        let matched: Vec<&str> = entries
            .iter()
            .filter(|e| e.contains(query))
            .map(String::as_str)
            .collect();
        if matched.is_empty() {
            Ok(None)
        } else {
            Ok(Some(matched.join("\n")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_memory_save_and_query() {
        let memory = LocalShortMemory::new(10);
        let dialogue = vec![
            DialogueMessage::new(Role::User, "我喜欢爵士乐"),
            DialogueMessage::new(Role::Assistant, "爵士乐很棒"),
        ];
        memory.save_memory(&dialogue, "s1").await.unwrap();

        let hit = memory.query_memory("爵士乐").await.unwrap();
        assert!(hit.is_some());
        assert!(memory.query_memory("摇滚").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_local_memory_capacity() {
        let memory = LocalShortMemory::new(2);
        for i in 0..5 {
            let dialogue = vec![DialogueMessage::new(Role::User, format!("消息{i}"))];
            memory.save_memory(&dialogue, "s1").await.unwrap();
        }
        assert!(memory.query_memory("消息0").await.unwrap().is_none());
        assert!(memory.query_memory("消息4").await.unwrap().is_some());
    }
}
