//! Device wire protocol
//!
//! JSON envelopes exchanged with devices over the persistent transport.
//! Binary frames carry raw audio and are not modeled here.

use serde::{Deserialize, Serialize};

/// Negotiated audio parameters advertised in the server hello.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AudioParams {
    pub format: String,
    pub sample_rate: u32,
    pub channels: u8,
    /// Frame duration in milliseconds
    pub frame_duration: u32,
}

impl Default for AudioParams {
    fn default() -> Self {
        Self {
            format: "opus".to_string(),
            sample_rate: 16000,
            channels: 1,
            frame_duration: 60,
        }
    }
}

/// TTS playback state reported to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtsState {
    Start,
    Stop,
    SentenceStart,
    SentenceEnd,
}

/// Messages received from a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceMessage {
    /// Transport handshake
    Hello {
        #[serde(default)]
        version: u32,
        #[serde(default)]
        transport: Option<String>,
        #[serde(default)]
        audio_params: Option<AudioParams>,
    },
    /// Recognized or typed text from the device side
    Text { text: String },
    /// Listen mode change (`auto` or `manual`)
    Listen {
        #[serde(default)]
        mode: Option<String>,
        #[serde(default)]
        state: Option<String>,
    },
    /// Device-initiated interruption of current playback
    Abort,
    /// Runtime feature toggles
    Config {
        #[serde(default)]
        features: serde_json::Value,
    },
}

/// Messages sent to a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake reply
    Hello {
        version: u32,
        transport: String,
        audio_params: AudioParams,
        session_id: String,
    },
    /// Echo of recognized speech
    Stt { session_id: String, text: String },
    /// TTS playback state, optionally with the text being synthesized
    Tts {
        session_id: String,
        state: TtsState,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    /// Assistant text turn
    Text {
        session_id: String,
        text: String,
        role: String,
    },
    /// Coarse connection state (`listening`, `processing`, `speaking`)
    State { session_id: String, state: String },
}

impl ServerMessage {
    pub fn stt(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Stt {
            session_id: session_id.into(),
            text: text.into(),
        }
    }

    pub fn tts(session_id: impl Into<String>, state: TtsState, text: Option<String>) -> Self {
        Self::Tts {
            session_id: session_id.into(),
            state,
            text,
        }
    }

    pub fn assistant_text(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Text {
            session_id: session_id.into(),
            text: text.into(),
            role: "assistant".to_string(),
        }
    }
}
