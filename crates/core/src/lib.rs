//! Core types for the voiceline conversation server
//!
//! This crate provides foundational types used across all other crates:
//! - Dialogue history and role-tagged messages
//! - Provider result types (VAD, intent, LLM tool calls)
//! - Device wire protocol envelopes

pub mod dialogue;
pub mod protocol;
pub mod types;

pub use dialogue::{Dialogue, DialogueMessage, Role};
pub use protocol::{AudioParams, DeviceMessage, ServerMessage, TtsState};
pub use types::{FunctionCall, FunctionDef, IntentResult, LlmDelta, ToolCall, VoiceActivityResult};
