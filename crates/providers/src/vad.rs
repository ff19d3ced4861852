//! Voice activity detection providers

use async_trait::async_trait;
use chrono::Utc;

use voiceline_core::VoiceActivityResult;

use crate::{ProviderError, VadProvider};

/// Energy-threshold VAD over 16-bit little-endian PCM frames.
///
/// Confidence is the normalized RMS; a frame is voiced when it crosses the
/// configured threshold.
pub struct EnergyVad {
    threshold: f32,
}

impl EnergyVad {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    fn rms(frame: &[u8]) -> f32 {
        if frame.len() < 2 {
            return 0.0;
        }
        let mut sum = 0.0f64;
        let mut count = 0usize;
        for chunk in frame.chunks_exact(2) {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]) as f64 / 32768.0;
            sum += sample * sample;
            count += 1;
        }
        if count == 0 {
            0.0
        } else {
            (sum / count as f64).sqrt() as f32
        }
    }
}

#[async_trait]
impl VadProvider for EnergyVad {
    async fn detect(&self, frame: &[u8]) -> Result<VoiceActivityResult, ProviderError> {
        let rms = Self::rms(frame);
        Ok(VoiceActivityResult {
            has_voice: rms >= self.threshold,
            confidence: rms.min(1.0),
            timestamp_ms: Utc::now().timestamp_millis(),
        })
    }
}

/// VAD that reports every frame as voiced; used when the device performs
/// its own endpointing.
pub struct PassthroughVad;

#[async_trait]
impl VadProvider for PassthroughVad {
    async fn detect(&self, _frame: &[u8]) -> Result<VoiceActivityResult, ProviderError> {
        Ok(VoiceActivityResult {
            has_voice: true,
            confidence: 1.0,
            timestamp_ms: Utc::now().timestamp_millis(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm_frame(amplitude: i16, samples: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(samples * 2);
        for i in 0..samples {
            let s = if i % 2 == 0 { amplitude } else { -amplitude };
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }

    #[tokio::test]
    async fn test_silence_is_not_voice() {
        let vad = EnergyVad::new(0.02);
        let result = vad.detect(&pcm_frame(0, 160)).await.unwrap();
        assert!(!result.has_voice);
    }

    #[tokio::test]
    async fn test_loud_frame_is_voice() {
        let vad = EnergyVad::new(0.02);
        let result = vad.detect(&pcm_frame(8000, 160)).await.unwrap();
        assert!(result.has_voice);
        assert!(result.confidence > 0.1);
    }

    #[tokio::test]
    async fn test_passthrough_always_voiced() {
        let vad = PassthroughVad;
        assert!(vad.detect(&[]).await.unwrap().has_voice);
    }
}
