//! Speech providers (ASR and TTS)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;

use crate::{AsrProvider, AudioStream, ProviderError, TextStream, TtsProvider};

/// ASR that recognizes nothing. Stands in until a real backend is
/// configured; segments handed to it are dropped.
pub struct NoopAsr;

#[async_trait]
impl AsrProvider for NoopAsr {
    async fn transcribe(&self, audio: &[u8]) -> Result<Option<String>, ProviderError> {
        tracing::debug!("NoopAsr discarding {} bytes", audio.len());
        Ok(None)
    }
}

/// TTS that produces silent fixed-size packets, one per character of input.
///
/// Useful for development and for exercising the pacing path without an
/// audio backend.
pub struct SilenceTts {
    packet_bytes: usize,
    aborted: Arc<AtomicBool>,
}

impl SilenceTts {
    pub fn new(packet_bytes: usize) -> Self {
        Self {
            packet_bytes,
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }

    fn packets_for(text: &str) -> usize {
        text.chars().filter(|c| !c.is_whitespace()).count().max(1)
    }
}

#[async_trait]
impl TtsProvider for SilenceTts {
    async fn synthesize(&self, text: &str) -> Result<Option<Vec<u8>>, ProviderError> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(vec![0u8; self.packet_bytes]))
    }

    fn synthesize_stream(&self, text: TextStream) -> AudioStream {
        self.aborted.store(false, Ordering::SeqCst);

        let packet_bytes = self.packet_bytes;
        let abort_outer = Arc::clone(&self.aborted);
        let abort_inner = Arc::clone(&self.aborted);

        let stream = text
            .take_while(move |_| {
                let keep_going = !abort_outer.load(Ordering::SeqCst);
                async move { keep_going }
            })
            .flat_map(move |chunk| {
                let abort = Arc::clone(&abort_inner);
                let count = Self::packets_for(&chunk);
                futures::stream::iter((0..count).map(move |_| vec![0u8; packet_bytes]))
                    .take_while(move |_| {
                        let keep_going = !abort.load(Ordering::SeqCst);
                        async move { keep_going }
                    })
            });

        Box::pin(stream)
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn test_noop_asr_recognizes_nothing() {
        let asr = NoopAsr;
        assert!(asr.transcribe(&[0u8; 1024]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_silence_tts_packet_count() {
        let tts = SilenceTts::new(120);
        let text: TextStream = Box::pin(stream::iter(vec!["你好".to_string()]));
        let packets: Vec<_> = tts.synthesize_stream(text).collect().await;
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].len(), 120);
    }

    #[tokio::test]
    async fn test_silence_tts_abort_stops_stream() {
        let tts = SilenceTts::new(120);
        let chunks: Vec<String> = vec!["很长的一句话".to_string(); 100];
        let mut audio = tts.synthesize_stream(Box::pin(stream::iter(chunks)));

        let first = audio.next().await;
        assert!(first.is_some());

        tts.abort();
        let mut remaining = 0;
        while audio.next().await.is_some() {
            remaining += 1;
        }
        // the in-flight chunk may drain a few packets, but the stream must
        // end well before all 600 packets
        assert!(remaining < 10, "drained {remaining} packets after abort");
    }

    #[tokio::test]
    async fn test_silence_tts_empty_text() {
        let tts = SilenceTts::new(120);
        assert!(tts.synthesize("   ").await.unwrap().is_none());
    }
}
