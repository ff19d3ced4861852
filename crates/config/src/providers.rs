//! Provider configuration
//!
//! One tagged-union config type per provider category. The `type` field
//! selects the variant; unknown discriminants are rejected at load time.

use serde::{Deserialize, Serialize};

/// Which provider backs each pipeline modality.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderSettings {
    #[serde(default)]
    pub vad: VadSettings,
    #[serde(default)]
    pub asr: AsrSettings,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub tts: TtsSettings,
    #[serde(default)]
    pub memory: MemorySettings,
    #[serde(default)]
    pub intent: IntentSettings,
}

/// Voice activity detection backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VadSettings {
    /// RMS energy threshold over 16-bit PCM frames
    Energy {
        #[serde(default = "default_vad_threshold")]
        threshold: f32,
    },
    /// Treat every frame as voiced (VAD delegated to the device)
    Passthrough,
}

fn default_vad_threshold() -> f32 {
    0.02
}

impl Default for VadSettings {
    fn default() -> Self {
        Self::Energy {
            threshold: default_vad_threshold(),
        }
    }
}

/// Speech recognition backend.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AsrSettings {
    /// No recognition; audio segments are discarded
    #[default]
    Noop,
}

/// LLM backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LlmSettings {
    /// Echoes the last user message back, prefixed; for development
    Echo {
        #[serde(default)]
        prefix: String,
    },
    /// Always replies with a fixed text
    Canned { reply: String },
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self::Echo {
            prefix: String::new(),
        }
    }
}

/// TTS backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TtsSettings {
    /// Emits silent fixed-size packets, one per frame duration of text
    Silence {
        #[serde(default = "default_packet_bytes")]
        packet_bytes: usize,
    },
}

fn default_packet_bytes() -> usize {
    120
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self::Silence {
            packet_bytes: default_packet_bytes(),
        }
    }
}

/// Conversation memory backend.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MemorySettings {
    /// No persistence
    #[default]
    Nomem,
    /// Short-term in-process memory
    LocalShort {
        #[serde(default = "default_memory_entries")]
        max_entries: usize,
    },
}

fn default_memory_entries() -> usize {
    100
}

/// Intent recognition backend.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntentSettings {
    /// No structured intent detection; everything goes to chat
    Nointent,
    /// Intents resolved through LLM function-calling with the tool registry
    #[default]
    FunctionCall,
}
