//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::{ConfigError, ProviderSettings};

/// Main application settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Conversation behavior
    #[serde(default)]
    pub conversation: ConversationSettings,

    /// Provider selection
    #[serde(default)]
    pub providers: ProviderSettings,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilitySettings,
}

impl Settings {
    /// Validate settings, rejecting combinations that would leave the
    /// server non-functional.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.auth.enabled && self.server.auth.secret_key.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "server.auth.secret_key".to_string(),
                message: "authentication enabled without a secret key".to_string(),
            });
        }

        if self.conversation.close_connection_no_voice_time < 10 {
            return Err(ConfigError::InvalidValue {
                field: "conversation.close_connection_no_voice_time".to_string(),
                message: "idle window too short (minimum 10 seconds)".to_string(),
            });
        }

        if self.conversation.frame_duration_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "conversation.frame_duration_ms".to_string(),
                message: "frame duration must be positive".to_string(),
            });
        }

        Ok(())
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Bind host
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port
    #[serde(default = "default_port")]
    pub port: u16,

    /// WebSocket path for device connections
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    /// Externally advertised WebSocket URL (returned from OTA); empty means
    /// derive from host and port
    #[serde(default)]
    pub websocket_url: String,

    /// MQTT gateway endpoint advertised to devices; empty disables the
    /// gateway credential block in OTA responses
    #[serde(default)]
    pub mqtt_gateway: String,

    /// Key used to sign MQTT gateway passwords
    #[serde(default)]
    pub mqtt_signature_key: String,

    /// Directory holding `model_version.bin` firmware images
    #[serde(default = "default_firmware_dir")]
    pub firmware_dir: String,

    /// Firmware directory scan cache TTL in seconds
    #[serde(default = "default_firmware_cache_ttl")]
    pub firmware_cache_ttl: u64,

    /// Minutes offset from UTC reported in OTA responses
    #[serde(default = "default_timezone_offset")]
    pub timezone_offset_minutes: i32,

    /// Authentication configuration
    #[serde(default)]
    pub auth: AuthSettings,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ws_path: default_ws_path(),
            websocket_url: String::new(),
            mqtt_gateway: String::new(),
            mqtt_signature_key: String::new(),
            firmware_dir: default_firmware_dir(),
            firmware_cache_ttl: default_firmware_cache_ttl(),
            timezone_offset_minutes: default_timezone_offset(),
            auth: AuthSettings::default(),
        }
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthSettings {
    /// Enable token verification on device connections
    #[serde(default)]
    pub enabled: bool,

    /// HMAC signing key (set via VOICELINE__SERVER__AUTH__SECRET_KEY)
    #[serde(default)]
    pub secret_key: String,

    /// Devices allowed to connect without binding; empty disables the
    /// bind flow entirely
    #[serde(default)]
    pub allowed_devices: Vec<String>,

    /// Token lifetime in seconds; zero means the 30-day default
    #[serde(default)]
    pub expire_seconds: u64,
}

/// Conversation behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSettings {
    /// System prompt seeded into every dialogue
    #[serde(default)]
    pub prompt: String,

    /// Exact-match phrases that end the session
    #[serde(default = "default_exit_commands")]
    pub exit_commands: Vec<String>,

    /// Substring-match wake words
    #[serde(default = "default_wakeup_words")]
    pub wakeup_words: Vec<String>,

    /// Daily output cap in characters; zero disables the cap
    #[serde(default)]
    pub max_output_size: usize,

    /// Seconds of silence before the farewell flow starts
    #[serde(default = "default_no_voice_time")]
    pub close_connection_no_voice_time: u64,

    /// Outbound audio frame duration in milliseconds
    #[serde(default = "default_frame_duration")]
    pub frame_duration_ms: u64,

    /// Default listen mode (`auto` or `manual`)
    #[serde(default = "default_listen_mode")]
    pub listen_mode: String,

    /// End-of-conversation prompt
    #[serde(default)]
    pub end_prompt: EndPromptSettings,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            exit_commands: default_exit_commands(),
            wakeup_words: default_wakeup_words(),
            max_output_size: 0,
            close_connection_no_voice_time: default_no_voice_time(),
            frame_duration_ms: default_frame_duration(),
            listen_mode: default_listen_mode(),
            end_prompt: EndPromptSettings::default(),
        }
    }
}

/// End-of-conversation prompt configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndPromptSettings {
    /// Speak a farewell before closing an idle conversation
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Prompt fed to the LLM to produce the farewell
    #[serde(default = "default_end_prompt")]
    pub prompt: String,
}

impl Default for EndPromptSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            prompt: default_end_prompt(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilitySettings {
    /// Log level filter
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON-formatted logs
    #[serde(default)]
    pub log_json: bool,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_ws_path() -> String {
    "/voiceline/v1".to_string()
}
fn default_firmware_dir() -> String {
    "data/bin".to_string()
}
fn default_firmware_cache_ttl() -> u64 {
    300
}
fn default_timezone_offset() -> i32 {
    480
}
fn default_exit_commands() -> Vec<String> {
    vec![
        "退出".to_string(),
        "关闭".to_string(),
        "exit".to_string(),
        "quit".to_string(),
    ]
}
fn default_wakeup_words() -> Vec<String> {
    vec!["你好小智".to_string(), "嘿你好呀".to_string()]
}
fn default_no_voice_time() -> u64 {
    120
}
fn default_frame_duration() -> u64 {
    60
}
fn default_listen_mode() -> String {
    "auto".to_string()
}
fn default_end_prompt() -> String {
    "请你以```时间过得真快```为开头，用富有感情、依依不舍的话来结束这场对话吧！".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}

/// Load settings from files and environment.
///
/// Priority (highest to lowest):
/// 1. Environment variables (`VOICELINE__` prefix, `__` separator)
/// 2. `config/{env}.yaml` (if an environment name is given)
/// 3. `config/default.yaml`
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder = builder.add_source(File::with_name(&format!("config/{env_name}")).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("VOICELINE")
            .separator("__")
            .try_parsing(true),
    );

    let settings: Settings = builder.build()?.try_deserialize()?;
    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8000);
        assert_eq!(settings.conversation.close_connection_no_voice_time, 120);
        assert!(settings.conversation.end_prompt.enabled);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_auth_requires_secret() {
        let mut settings = Settings::default();
        settings.server.auth.enabled = true;
        assert!(settings.validate().is_err());

        settings.server.auth.secret_key = "not-so-secret".to_string();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_idle_window_floor() {
        let mut settings = Settings::default();
        settings.conversation.close_connection_no_voice_time = 5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_default_exit_commands_include_chinese() {
        let settings = Settings::default();
        assert!(settings
            .conversation
            .exit_commands
            .iter()
            .any(|c| c == "退出"));
    }
}
