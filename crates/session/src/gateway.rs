//! Gateway frame codec
//!
//! Audio relayed through the MQTT gateway carries a fixed 16-byte
//! big-endian header:
//!
//! ```text
//! offset  size  field
//! 0       1     protocol version (1)
//! 1       1     frame type (2 = audio)
//! 2       2     reserved
//! 4       4     sequence
//! 8       4     timestamp (millis, truncated)
//! 12      4     payload length
//! 16      ...   payload
//! ```

use thiserror::Error;

/// Total header length in bytes.
pub const HEADER_LEN: usize = 16;

pub const PROTOCOL_VERSION: u8 = 1;
pub const FRAME_TYPE_AUDIO: u8 = 2;

/// Malformed gateway frame.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame too short: {len} bytes")]
    TooShort { len: usize },

    #[error("Declared payload length {declared} exceeds frame ({available} bytes available)")]
    LengthMismatch { declared: usize, available: usize },

    #[error("Frame carries no payload")]
    EmptyPayload,
}

/// A parsed inbound gateway frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayFrame {
    pub timestamp: u64,
    pub payload: Vec<u8>,
}

fn read_u32_be(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Parse an inbound gateway frame.
///
/// The payload is bounded by the declared length when one is given; a
/// declared length that does not fit in the frame is malformed.
pub fn parse(frame: &[u8]) -> Result<GatewayFrame, FrameError> {
    if frame.len() < HEADER_LEN {
        return Err(FrameError::TooShort { len: frame.len() });
    }

    let timestamp = read_u32_be(&frame[8..12]) as u64;
    let declared = read_u32_be(&frame[12..16]) as usize;
    let available = frame.len() - HEADER_LEN;

    let payload = if declared > 0 {
        if declared > available {
            return Err(FrameError::LengthMismatch {
                declared,
                available,
            });
        }
        frame[HEADER_LEN..HEADER_LEN + declared].to_vec()
    } else if available > 0 {
        frame[HEADER_LEN..].to_vec()
    } else {
        return Err(FrameError::EmptyPayload);
    };

    Ok(GatewayFrame { timestamp, payload })
}

/// Wrap an outbound audio packet in a gateway header.
pub fn wrap(payload: &[u8], sequence: u32, timestamp: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.push(PROTOCOL_VERSION);
    out.push(FRAME_TYPE_AUDIO);
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&sequence.to_be_bytes());
    out.extend_from_slice(&timestamp.to_be_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}
