//! WebSocket and HTTP surface of the voiceline server
//!
//! Devices connect over WebSocket for the conversation pipeline; a small
//! HTTP API serves firmware (OTA) metadata and vision Q&A.

pub mod auth;
pub mod http;
pub mod ota;
pub mod state;
pub mod vision;
pub mod ws;

pub use auth::AuthManager;
pub use http::create_router;
pub use state::AppState;

use thiserror::Error;

/// Server errors.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] voiceline_config::ConfigError),

    #[error(transparent)]
    Provider(#[from] voiceline_providers::ProviderError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
