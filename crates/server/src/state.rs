//! Application state
//!
//! Shared state across all handlers.

use std::sync::Arc;

use parking_lot::Mutex;

use voiceline_config::Settings;
use voiceline_session::ConnectionRegistry;
use voiceline_tools::ToolRegistry;

use crate::auth::AuthManager;
use crate::ota::FirmwareCache;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    /// Configuration
    pub settings: Arc<Settings>,
    /// Live connections
    pub registry: Arc<ConnectionRegistry>,
    /// Tool registry shared by all sessions
    pub tools: Arc<ToolRegistry>,
    /// Token signer/verifier
    pub auth: Arc<AuthManager>,
    /// TTL-cached firmware directory listing
    pub firmware_cache: Arc<Mutex<Option<FirmwareCache>>>,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let auth = AuthManager::new(
            settings.server.auth.secret_key.clone(),
            settings.server.auth.expire_seconds,
        );
        Self {
            settings: Arc::new(settings),
            registry: ConnectionRegistry::new(),
            tools: Arc::new(voiceline_tools::create_default_registry()),
            auth: Arc::new(auth),
            firmware_cache: Arc::new(Mutex::new(None)),
        }
    }
}
