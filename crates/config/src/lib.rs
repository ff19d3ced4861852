//! Configuration for the voiceline server
//!
//! Settings are loaded from YAML files (`config/default.yaml`, then an
//! optional environment-specific file) and overridden by `VOICELINE__`
//! prefixed environment variables.

mod providers;
mod settings;

pub use providers::{
    AsrSettings, IntentSettings, LlmSettings, MemorySettings, ProviderSettings, TtsSettings,
    VadSettings,
};
pub use settings::{
    load_settings, AuthSettings, ConversationSettings, EndPromptSettings, ObservabilitySettings,
    ServerSettings, Settings,
};

use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
