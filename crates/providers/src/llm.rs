//! LLM providers

use async_trait::async_trait;
use futures::stream;

use voiceline_core::{DialogueMessage, FunctionDef, LlmDelta, Role};

use crate::{LlmProvider, LlmStream, ProviderError, TextStream};

/// Splits a reply into word-sized chunks so downstream consumers exercise
/// their streaming paths.
fn chunked(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    text.split_inclusive(char::is_whitespace)
        .map(str::to_string)
        .collect()
}

/// Echoes the last user message back, optionally prefixed; for development
/// and tests.
pub struct EchoLlm {
    prefix: String,
}

impl EchoLlm {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn reply(&self, messages: &[DialogueMessage]) -> String {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        format!("{}{last_user}", self.prefix)
    }
}

#[async_trait]
impl LlmProvider for EchoLlm {
    async fn generate(
        &self,
        _session_id: &str,
        messages: &[DialogueMessage],
    ) -> Result<TextStream, ProviderError> {
        Ok(Box::pin(stream::iter(chunked(&self.reply(messages)))))
    }

    async fn generate_with_functions(
        &self,
        _session_id: &str,
        messages: &[DialogueMessage],
        _functions: &[FunctionDef],
    ) -> Result<LlmStream, ProviderError> {
        let deltas: Vec<LlmDelta> = chunked(&self.reply(messages))
            .into_iter()
            .map(LlmDelta::Text)
            .collect();
        Ok(Box::pin(stream::iter(deltas)))
    }
}

/// Always replies with a fixed text.
pub struct CannedLlm {
    reply: String,
}

impl CannedLlm {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl LlmProvider for CannedLlm {
    async fn generate(
        &self,
        _session_id: &str,
        _messages: &[DialogueMessage],
    ) -> Result<TextStream, ProviderError> {
        Ok(Box::pin(stream::iter(chunked(&self.reply))))
    }

    async fn generate_with_functions(
        &self,
        _session_id: &str,
        _messages: &[DialogueMessage],
        _functions: &[FunctionDef],
    ) -> Result<LlmStream, ProviderError> {
        let deltas: Vec<LlmDelta> = chunked(&self.reply).into_iter().map(LlmDelta::Text).collect();
        Ok(Box::pin(stream::iter(deltas)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_echo_llm_returns_last_user_message() {
        let llm = EchoLlm::new("");
        let mut messages = vec![DialogueMessage::new(Role::User, "第一句")];
        messages.push(DialogueMessage::new(Role::Assistant, "回复"));
        messages.push(DialogueMessage::new(Role::User, "第二句"));

        let chunks: Vec<String> = llm.generate("s1", &messages).await.unwrap().collect().await;
        assert_eq!(chunks.join(""), "第二句");
    }

    #[tokio::test]
    async fn test_canned_llm_streams_in_chunks() {
        let llm = CannedLlm::new("hello there world");
        let chunks: Vec<String> = llm.generate("s1", &[]).await.unwrap().collect().await;
        assert!(chunks.len() > 1);
        assert_eq!(chunks.join(""), "hello there world");
    }
}
