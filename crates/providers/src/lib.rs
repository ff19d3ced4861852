//! Provider capability interfaces
//!
//! Each pipeline modality (VAD, ASR, LLM, TTS, memory, intent) is consumed
//! through a narrow trait. Concrete backends are selected at session setup
//! via [`factory`] from the tagged provider configuration; a session binds
//! exactly one instance per kind for its whole lifetime.

pub mod factory;
pub mod intent;
pub mod llm;
pub mod memory;
pub mod speech;
pub mod vad;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

use voiceline_core::{DialogueMessage, FunctionDef, IntentResult, LlmDelta, VoiceActivityResult};

pub use factory::build_providers;

/// Provider errors.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider configuration error: {0}")]
    Config(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Provider is closed")]
    Closed,
}

/// Stream of text chunks (LLM output, TTS input).
pub type TextStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Stream of encoded audio packets.
pub type AudioStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// Stream of function-calling LLM deltas.
pub type LlmStream = Pin<Box<dyn Stream<Item = LlmDelta> + Send>>;

/// Voice activity detection.
#[async_trait]
pub trait VadProvider: Send + Sync {
    /// Classify a single audio frame.
    async fn detect(&self, frame: &[u8]) -> Result<VoiceActivityResult, ProviderError>;

    async fn close(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Speech recognition.
///
/// Frames are accumulated by the session's audio stage; a full utterance is
/// handed over at each speech boundary.
#[async_trait]
pub trait AsrProvider: Send + Sync {
    async fn open_audio_channels(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Transcribe an accumulated utterance. `None` means nothing was
    /// recognized; the segment is silently skipped.
    async fn transcribe(&self, audio: &[u8]) -> Result<Option<String>, ProviderError>;

    async fn close(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Conversational text generation.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stream a plain text response.
    async fn generate(
        &self,
        session_id: &str,
        messages: &[DialogueMessage],
    ) -> Result<TextStream, ProviderError>;

    /// Stream a response that may interleave text and tool calls.
    async fn generate_with_functions(
        &self,
        session_id: &str,
        messages: &[DialogueMessage],
        functions: &[FunctionDef],
    ) -> Result<LlmStream, ProviderError>;

    async fn close(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Speech synthesis.
#[async_trait]
pub trait TtsProvider: Send + Sync {
    /// Synthesize a complete utterance.
    async fn synthesize(&self, text: &str) -> Result<Option<Vec<u8>>, ProviderError>;

    /// Synthesize a stream of text chunks into a stream of audio packets.
    fn synthesize_stream(&self, text: TextStream) -> AudioStream;

    /// Stop the in-flight synthesis. Must be safe to call from a different
    /// stage than the one consuming the stream.
    fn abort(&self);

    async fn close(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Conversation memory.
#[async_trait]
pub trait MemoryProvider: Send + Sync {
    async fn init_memory(
        &self,
        role_id: &str,
        summary_config: Option<&serde_json::Value>,
    ) -> Result<(), ProviderError>;

    async fn save_memory(
        &self,
        dialogue: &[DialogueMessage],
        session_id: &str,
    ) -> Result<(), ProviderError>;

    async fn query_memory(&self, query: &str) -> Result<Option<String>, ProviderError>;

    async fn close(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Structured intent detection.
#[async_trait]
pub trait IntentProvider: Send + Sync {
    /// Detect a structured intent in an utterance; `None` falls through to
    /// general chat.
    async fn detect_intent(&self, text: &str) -> Result<Option<IntentResult>, ProviderError>;

    /// Function declarations this provider contributes to the LLM.
    fn functions(&self) -> Vec<FunctionDef> {
        Vec::new()
    }

    async fn close(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// The full provider binding for one session.
#[derive(Clone)]
pub struct ProviderSet {
    pub vad: Arc<dyn VadProvider>,
    pub asr: Arc<dyn AsrProvider>,
    pub llm: Arc<dyn LlmProvider>,
    pub tts: Arc<dyn TtsProvider>,
    pub memory: Arc<dyn MemoryProvider>,
    pub intent: Arc<dyn IntentProvider>,
}

impl ProviderSet {
    /// Close every provider, giving each a chance to flush. A failure in
    /// one never prevents closing the others.
    pub async fn close_all(&self) {
        if let Err(e) = self.vad.close().await {
            tracing::warn!("Error closing VAD provider: {e}");
        }
        if let Err(e) = self.asr.close().await {
            tracing::warn!("Error closing ASR provider: {e}");
        }
        if let Err(e) = self.llm.close().await {
            tracing::warn!("Error closing LLM provider: {e}");
        }
        if let Err(e) = self.tts.close().await {
            tracing::warn!("Error closing TTS provider: {e}");
        }
        if let Err(e) = self.memory.close().await {
            tracing::warn!("Error closing memory provider: {e}");
        }
        if let Err(e) = self.intent.close().await {
            tracing::warn!("Error closing intent provider: {e}");
        }
    }
}
