//! End-to-end pipeline tests
//!
//! Drives a full connection with scripted providers: silence → speech →
//! silence must produce exactly one recognized segment, one spoken reply,
//! and paced audio; barge-in must cut the reply short.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use voiceline_core::VoiceActivityResult;
use voiceline_providers::intent::NoIntent;
use voiceline_providers::llm::CannedLlm;
use voiceline_providers::memory::NoMemory;
use voiceline_providers::speech::SilenceTts;
use voiceline_providers::{AsrProvider, ProviderError, ProviderSet, VadProvider};
use voiceline_session::{Connection, ConnectionConfig, OutboundFrame};

/// VAD scripted by the first payload byte: 1 = voice, 0 = silence.
struct MarkerVad;

#[async_trait]
impl VadProvider for MarkerVad {
    async fn detect(&self, frame: &[u8]) -> Result<VoiceActivityResult, ProviderError> {
        let has_voice = frame.first().copied() == Some(1);
        Ok(VoiceActivityResult {
            has_voice,
            confidence: if has_voice { 0.9 } else { 0.1 },
            timestamp_ms: 0,
        })
    }
}

/// ASR that records segment sizes and always recognizes the same text.
struct RecordingAsr {
    calls: Arc<Mutex<Vec<usize>>>,
}

#[async_trait]
impl AsrProvider for RecordingAsr {
    async fn transcribe(&self, audio: &[u8]) -> Result<Option<String>, ProviderError> {
        self.calls.lock().push(audio.len());
        Ok(Some("今天天气怎么样".to_string()))
    }
}

fn scripted_providers(asr_calls: Arc<Mutex<Vec<usize>>>, reply: &str) -> ProviderSet {
    ProviderSet {
        vad: Arc::new(MarkerVad),
        asr: Arc::new(RecordingAsr { calls: asr_calls }),
        llm: Arc::new(CannedLlm::new(reply)),
        tts: Arc::new(SilenceTts::new(120)),
        memory: Arc::new(NoMemory),
        intent: Arc::new(NoIntent),
    }
}

fn spawn_connection(
    providers: ProviderSet,
) -> (Arc<Connection>, mpsc::UnboundedReceiver<OutboundFrame>) {
    let tools = Arc::new(voiceline_tools::create_default_registry());
    let (conn, rx) = Connection::spawn(
        "device-e2e",
        "client-e2e",
        ConnectionConfig::default(),
        providers,
        tools,
        Weak::new(),
    );
    conn.mark_ready();
    (conn, rx)
}

const FRAME_BYTES: usize = 10;

fn frame(voiced: bool) -> Vec<u8> {
    vec![if voiced { 1 } else { 0 }; FRAME_BYTES]
}

#[tokio::test(start_paused = true)]
async fn test_silence_speech_silence_produces_one_segment() {
    let asr_calls = Arc::new(Mutex::new(Vec::new()));
    let (conn, mut rx) = spawn_connection(scripted_providers(Arc::clone(&asr_calls), "天气晴朗"));

    for _ in 0..20 {
        conn.handle_audio(frame(false)).await;
    }
    for _ in 0..10 {
        conn.handle_audio(frame(true)).await;
    }
    for _ in 0..20 {
        conn.handle_audio(frame(false)).await;
    }

    // collect outbound frames until the trailing tts stop arrives
    let mut envelopes: Vec<String> = Vec::new();
    let mut audio_packets = 0usize;
    let deadline = Duration::from_secs(30);
    let result = timeout(deadline, async {
        loop {
            match rx.recv().await {
                Some(OutboundFrame::Text(payload)) => {
                    let is_stop = payload.contains("\"tts\"") && payload.contains("\"stop\"");
                    envelopes.push(payload);
                    if is_stop {
                        break;
                    }
                }
                Some(OutboundFrame::Binary(_)) => audio_packets += 1,
                None => break,
            }
        }
    })
    .await;
    assert!(result.is_ok(), "pipeline never finished the utterance");

    // exactly one speech-stop event reached ASR, with voiced frames plus
    // leading context (at least 15 frames)
    let calls = asr_calls.lock();
    assert_eq!(calls.len(), 1, "expected exactly one recognized segment");
    assert!(
        calls[0] >= 15 * FRAME_BYTES,
        "segment too short: {} bytes",
        calls[0]
    );

    // the recognized text was echoed back before the reply
    assert!(envelopes
        .iter()
        .any(|e| e.contains("\"stt\"") && e.contains("今天天气怎么样")));

    // the canned reply was spoken: tts start, one audio packet per
    // character, assistant text, tts stop
    assert!(envelopes
        .iter()
        .any(|e| e.contains("\"tts\"") && e.contains("\"start\"")));
    assert!(envelopes
        .iter()
        .any(|e| e.contains("\"text\"") && e.contains("天气晴朗")));
    assert_eq!(audio_packets, 4);

    assert!(!conn.is_speaking(), "speaking flag must clear after pacing");
}

#[tokio::test(start_paused = true)]
async fn test_barge_in_stops_audio() {
    let asr_calls = Arc::new(Mutex::new(Vec::new()));
    let long_reply = "很".repeat(200);
    let (conn, mut rx) = spawn_connection(scripted_providers(asr_calls, &long_reply));

    conn.handle_text("讲个故事".to_string()).await;

    // wait for the first paced audio packet
    let got_audio = timeout(Duration::from_secs(30), async {
        loop {
            match rx.recv().await {
                Some(OutboundFrame::Binary(_)) => break true,
                Some(OutboundFrame::Text(_)) => continue,
                None => break false,
            }
        }
    })
    .await;
    assert_eq!(got_audio.ok(), Some(true), "no audio was paced out");

    conn.abort_speaking();
    assert!(!conn.is_speaking());

    // drain whatever was already in flight, then confirm the stream stays
    // silent: with 200 queued characters, pacing would otherwise continue
    // for ~12 seconds
    tokio::time::sleep(Duration::from_millis(200)).await;
    while rx.try_recv().is_ok() {}

    tokio::time::sleep(Duration::from_secs(5)).await;
    let mut late_audio = 0;
    while let Ok(frame) = rx.try_recv() {
        if matches!(frame, OutboundFrame::Binary(_)) {
            late_audio += 1;
        }
    }
    assert_eq!(late_audio, 0, "audio kept flowing after abort");
}

#[tokio::test(start_paused = true)]
async fn test_exit_command_closes_session() {
    let asr_calls = Arc::new(Mutex::new(Vec::new()));
    let (conn, _rx) = spawn_connection(scripted_providers(asr_calls, "好的"));

    conn.handle_text("退出".to_string()).await;

    let closed = timeout(Duration::from_secs(10), async {
        while !conn.is_stopped() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(closed.is_ok(), "exit command did not close the session");
}

#[tokio::test(start_paused = true)]
async fn test_wake_word_sets_cooldown_without_reply() {
    let asr_calls = Arc::new(Mutex::new(Vec::new()));
    let (conn, mut rx) = spawn_connection(scripted_providers(asr_calls, "不应该说这句"));

    conn.handle_text("你好小智".to_string()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut saw_reply = false;
    while let Ok(frame) = rx.try_recv() {
        if let OutboundFrame::Text(payload) = frame {
            if payload.contains("不应该说这句") {
                saw_reply = true;
            }
        }
    }
    assert!(!saw_reply, "wake word must not reach the LLM");
    assert!(!conn.is_stopped());
}
