//! Intent providers

use async_trait::async_trait;

use voiceline_core::{FunctionDef, IntentResult};

use crate::{IntentProvider, ProviderError};

/// No structured intent detection; every utterance falls through to chat.
pub struct NoIntent;

#[async_trait]
impl IntentProvider for NoIntent {
    async fn detect_intent(&self, _text: &str) -> Result<Option<IntentResult>, ProviderError> {
        Ok(None)
    }
}

/// Intent resolution delegated to LLM function-calling.
///
/// Detection itself yields nothing; instead the provider contributes the
/// registered tool declarations to the chat flow, and the LLM decides which
/// function to call.
pub struct FunctionCallIntent {
    functions: Vec<FunctionDef>,
}

impl FunctionCallIntent {
    pub fn new(functions: Vec<FunctionDef>) -> Self {
        Self { functions }
    }
}

#[async_trait]
impl IntentProvider for FunctionCallIntent {
    async fn detect_intent(&self, _text: &str) -> Result<Option<IntentResult>, ProviderError> {
        Ok(None)
    }

    fn functions(&self) -> Vec<FunctionDef> {
        self.functions.clone()
    }
}
