//! Device authentication
//!
//! HMAC-SHA256 token scheme shared with the MQTT gateway. A token carries
//! only the signature and issue timestamp (`signature.ts`); the client id
//! and device id travel separately in the connection metadata, so the
//! token itself leaks nothing.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_EXPIRE_SECONDS: u64 = 60 * 60 * 24 * 30;

fn now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Token issuance and verification for device connections.
pub struct AuthManager {
    secret_key: String,
    expire_seconds: u64,
}

impl AuthManager {
    pub fn new(secret_key: impl Into<String>, expire_seconds: u64) -> Self {
        Self {
            secret_key: secret_key.into(),
            expire_seconds: if expire_seconds == 0 {
                DEFAULT_EXPIRE_SECONDS
            } else {
                expire_seconds
            },
        }
    }

    fn sign(&self, content: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(content.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }

    /// Issue a token for a (client id, username) pair. The username is
    /// conventionally the device id.
    pub fn generate_token(&self, client_id: &str, username: &str) -> String {
        let ts = now_seconds();
        let signature = self.sign(&format!("{client_id}|{username}|{ts}"));
        format!("{signature}.{ts}")
    }

    /// Verify a token against the ids presented at connection time.
    pub fn verify_token(&self, token: &str, client_id: &str, username: &str) -> bool {
        let Some((signature, ts_str)) = token.split_once('.') else {
            return false;
        };
        let Ok(ts) = ts_str.parse::<u64>() else {
            return false;
        };
        if now_seconds().saturating_sub(ts) > self.expire_seconds {
            return false;
        }
        self.sign(&format!("{client_id}|{username}|{ts}")) == signature
    }

    /// Sign arbitrary content with the gateway signature scheme (standard
    /// base64, used for MQTT passwords).
    pub fn sign_standard_base64(&self, content: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(content.as_bytes());
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }
}
