//! Per-device session state machine and audio/text pipeline
//!
//! One [`Connection`] owns a device's lifecycle from handshake to teardown
//! and coordinates VAD → ASR → intent → LLM → TTS as concurrent stages
//! connected by queues. The leaf components live in their own modules:
//! gateway frame reassembly ([`reorder`]), voice-activity debouncing
//! ([`vad_gate`]), and real-time outbound pacing ([`pacer`]).

mod chat;
pub mod connection;
pub mod gateway;
pub mod intent_router;
pub mod pacer;
pub mod registry;
pub mod reorder;
pub mod vad_gate;

pub use connection::{Connection, ConnectionConfig, ListenMode, OutboundFrame};
pub use gateway::FrameError;
pub use intent_router::{IntentRouter, RouteOutcome};
pub use pacer::AudioPacer;
pub use registry::ConnectionRegistry;
pub use reorder::ReorderBuffer;
pub use vad_gate::VoiceGate;

use thiserror::Error;

/// Session pipeline errors.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session is stopped")]
    Stopped,

    #[error(transparent)]
    Provider(#[from] voiceline_providers::ProviderError),
}
