//! Per-device connection
//!
//! Owns the full lifecycle of one device: the four background stages
//! (audio consumer, text consumer, report worker, idle checker), the
//! outbound pacing flow, interruption, and teardown.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use voiceline_config::Settings;
use voiceline_core::{Dialogue, ServerMessage, TtsState};
use voiceline_providers::ProviderSet;
use voiceline_tools::ToolRegistry;

use crate::gateway;
use crate::intent_router::{IntentRouter, RouteOutcome};
use crate::pacer::AudioPacer;
use crate::registry::ConnectionRegistry;
use crate::reorder::ReorderBuffer;
use crate::vad_gate::VoiceGate;

/// Silent frames kept before the first voiced frame of a segment.
const PRE_BUFFER_FRAMES: usize = 5;
/// Minimum accumulated frames for a segment to reach ASR.
const MIN_ASR_FRAMES: usize = 15;
/// Seconds between bind-code prompts.
const BIND_PROMPT_INTERVAL_SECS: u64 = 60;
/// VAD bypass window after a wake word.
const WAKE_COOLDOWN: Duration = Duration::from_secs(2);
/// Idle checker poll interval.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(10);
/// Grace added to the no-voice window before the idle checker closes.
const IDLE_GRACE_SECS: u64 = 60;

const MAX_OUTPUT_TEXT: &str =
    "不好意思，我现在有点事情要忙，明天这个时候我们再聊，约好了哦！明天不见不散，拜拜！";

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Listening mode; `manual` disables barge-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenMode {
    Auto,
    Manual,
}

impl ListenMode {
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("manual") {
            Self::Manual
        } else {
            Self::Auto
        }
    }
}

/// Frames handed to the transport writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// Usage report category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Asr,
    Tts,
}

/// One queued usage report.
#[derive(Debug, Clone)]
pub struct ReportItem {
    pub kind: ReportKind,
    pub text: String,
    pub audio_bytes: usize,
    pub timestamp_ms: u64,
}

/// Immutable per-connection configuration snapshot.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub system_prompt: String,
    pub exit_commands: Vec<String>,
    pub wakeup_words: Vec<String>,
    pub end_prompt_enabled: bool,
    pub end_prompt: String,
    pub max_output_size: usize,
    pub close_connection_no_voice_time: u64,
    pub frame_duration_ms: u64,
    pub listen_mode: ListenMode,
    pub from_gateway: bool,
    pub report_asr: bool,
    pub report_tts: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            exit_commands: vec![
                "退出".to_string(),
                "关闭".to_string(),
                "exit".to_string(),
                "quit".to_string(),
            ],
            wakeup_words: vec!["你好小智".to_string(), "嘿你好呀".to_string()],
            end_prompt_enabled: true,
            end_prompt: "请你用依依不舍的话来结束这场对话吧".to_string(),
            max_output_size: 0,
            close_connection_no_voice_time: 120,
            frame_duration_ms: 60,
            listen_mode: ListenMode::Auto,
            from_gateway: false,
            report_asr: false,
            report_tts: false,
        }
    }
}

impl ConnectionConfig {
    pub fn from_settings(settings: &Settings, from_gateway: bool) -> Self {
        let conversation = &settings.conversation;
        Self {
            system_prompt: conversation.prompt.clone(),
            exit_commands: conversation.exit_commands.clone(),
            wakeup_words: conversation.wakeup_words.clone(),
            end_prompt_enabled: conversation.end_prompt.enabled,
            end_prompt: conversation.end_prompt.prompt.clone(),
            max_output_size: conversation.max_output_size,
            close_connection_no_voice_time: conversation.close_connection_no_voice_time,
            frame_duration_ms: conversation.frame_duration_ms,
            listen_mode: ListenMode::parse(&conversation.listen_mode),
            from_gateway,
            report_asr: false,
            report_tts: false,
        }
    }
}

/// State touched only by the audio stage.
struct AudioStageState {
    gate: VoiceGate,
    pre_buffer: VecDeque<Vec<u8>>,
    asr_audio: Vec<Vec<u8>>,
}

/// One device's live conversation.
pub struct Connection {
    pub session_id: String,
    pub device_id: String,
    pub client_id: String,

    pub(crate) config: ConnectionConfig,
    pub(crate) providers: ProviderSet,
    pub(crate) tools: Arc<ToolRegistry>,
    router: IntentRouter,

    outbound: mpsc::UnboundedSender<OutboundFrame>,
    audio_tx: mpsc::UnboundedSender<Vec<u8>>,
    text_tx: mpsc::UnboundedSender<String>,
    report_tx: mpsc::UnboundedSender<ReportItem>,

    is_stopped: AtomicBool,
    is_speaking: AtomicBool,
    client_is_speaking: AtomicBool,
    pub(crate) client_abort: AtomicBool,
    need_bind: AtomicBool,
    just_woken_up: AtomicBool,
    vad_resume_active: AtomicBool,
    pub(crate) close_after_chat: AtomicBool,
    listen_mode: RwLock<ListenMode>,

    first_activity_ms: AtomicU64,
    last_activity_ms: AtomicU64,
    last_voice_ms: AtomicU64,
    last_bind_prompt_s: AtomicU64,

    bind_ready_tx: watch::Sender<bool>,
    bind_ready_rx: watch::Receiver<bool>,
    bind_code: RwLock<Option<String>>,

    audio_state: Mutex<AudioStageState>,
    reorder: Mutex<ReorderBuffer>,
    gateway_seq: AtomicU32,

    pub(crate) dialogue: Mutex<Dialogue>,
    sentence_counter: AtomicU64,
    pub(crate) output_chars: AtomicUsize,
    current_speaker: RwLock<Option<String>>,

    pub(crate) pacer: Arc<AudioPacer>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    registry: Weak<ConnectionRegistry>,
}

impl Connection {
    /// Create a connection and spawn its background stages. Returns the
    /// receiver side of the outbound frame channel for the transport
    /// writer to drain.
    pub fn spawn(
        device_id: impl Into<String>,
        client_id: impl Into<String>,
        config: ConnectionConfig,
        providers: ProviderSet,
        tools: Arc<ToolRegistry>,
        registry: Weak<ConnectionRegistry>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        let (text_tx, text_rx) = mpsc::unbounded_channel();
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let (bind_ready_tx, bind_ready_rx) = watch::channel(false);

        let now = now_ms();
        let router = IntentRouter::new(
            config.exit_commands.clone(),
            config.wakeup_words.clone(),
            config
                .end_prompt_enabled
                .then(|| config.end_prompt.clone()),
        );
        let pacer = AudioPacer::new(config.frame_duration_ms);

        let connection = Arc::new(Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            device_id: device_id.into(),
            client_id: client_id.into(),
            dialogue: Mutex::new(Dialogue::with_system_prompt(config.system_prompt.clone())),
            listen_mode: RwLock::new(config.listen_mode),
            config,
            providers,
            tools,
            router,
            outbound: outbound_tx,
            audio_tx,
            text_tx,
            report_tx,
            is_stopped: AtomicBool::new(false),
            is_speaking: AtomicBool::new(false),
            client_is_speaking: AtomicBool::new(false),
            client_abort: AtomicBool::new(false),
            need_bind: AtomicBool::new(false),
            just_woken_up: AtomicBool::new(false),
            vad_resume_active: AtomicBool::new(false),
            close_after_chat: AtomicBool::new(false),
            first_activity_ms: AtomicU64::new(now),
            last_activity_ms: AtomicU64::new(now),
            last_voice_ms: AtomicU64::new(now),
            last_bind_prompt_s: AtomicU64::new(0),
            bind_ready_tx,
            bind_ready_rx,
            bind_code: RwLock::new(None),
            audio_state: Mutex::new(AudioStageState {
                gate: VoiceGate::new(),
                pre_buffer: VecDeque::with_capacity(PRE_BUFFER_FRAMES + 1),
                asr_audio: Vec::new(),
            }),
            reorder: Mutex::new(ReorderBuffer::default()),
            gateway_seq: AtomicU32::new(0),
            sentence_counter: AtomicU64::new(0),
            output_chars: AtomicUsize::new(0),
            current_speaker: RwLock::new(None),
            pacer,
            tasks: Mutex::new(Vec::new()),
            registry,
        });

        connection.start(audio_rx, text_rx, report_rx);
        (connection, outbound_rx)
    }

    fn start(
        self: &Arc<Self>,
        mut audio_rx: mpsc::UnboundedReceiver<Vec<u8>>,
        mut text_rx: mpsc::UnboundedReceiver<String>,
        mut report_rx: mpsc::UnboundedReceiver<ReportItem>,
    ) {
        let mut tasks = self.tasks.lock();

        let conn = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            while let Some(frame) = audio_rx.recv().await {
                if conn.is_stopped() {
                    break;
                }
                conn.process_audio_frame(frame).await;
            }
        }));

        let conn = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            while let Some(text) = text_rx.recv().await {
                if conn.is_stopped() {
                    break;
                }
                conn.process_text(text).await;
            }
        }));

        let conn = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            while let Some(item) = report_rx.recv().await {
                if conn.is_stopped() {
                    break;
                }
                tracing::debug!(
                    kind = ?item.kind,
                    audio_bytes = item.audio_bytes,
                    "Processing usage report: {}",
                    item.text
                );
            }
        }));

        let conn = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(IDLE_CHECK_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if conn.is_stopped() {
                    break;
                }
                let base = if conn.need_bind.load(Ordering::SeqCst) {
                    conn.first_activity_ms.load(Ordering::SeqCst)
                } else {
                    conn.last_activity_ms.load(Ordering::SeqCst)
                };
                let timeout_ms =
                    (conn.config.close_connection_no_voice_time + IDLE_GRACE_SECS) * 1000;
                if base > 0 && now_ms().saturating_sub(base) > timeout_ms {
                    tracing::info!("Connection timed out, closing: {}", conn.session_id);
                    conn.close().await;
                    break;
                }
            }
        }));

        let pacer = Arc::clone(&self.pacer);
        let outbound = self.outbound.clone();
        tasks.push(tokio::spawn(pacer.run(move |packet| {
            if outbound.send(OutboundFrame::Binary(packet)).is_err() {
                tracing::debug!("Outbound channel closed, dropping audio packet");
            }
        })));
    }

    // ---- public API -----------------------------------------------------

    /// Feed one inbound binary frame.
    pub async fn handle_audio(&self, data: Vec<u8>) {
        if self.is_stopped() {
            return;
        }
        self.touch();
        self.await_ready().await;
        if self.is_stopped() {
            return;
        }

        if self.need_bind.load(Ordering::SeqCst) {
            self.check_bind_prompt();
            return;
        }

        if self.config.from_gateway && data.len() >= gateway::HEADER_LEN {
            let admitted = self.reorder.lock().push(&data);
            match admitted {
                Ok(payloads) => {
                    for payload in payloads {
                        let _ = self.audio_tx.send(payload);
                    }
                }
                Err(e) => tracing::warn!("Rejected malformed gateway frame: {e}"),
            }
            return;
        }

        let _ = self.audio_tx.send(data);
    }

    /// Feed one inbound text utterance (device text or ASR output).
    pub async fn handle_text(&self, text: String) {
        if self.is_stopped() {
            return;
        }
        self.touch();
        self.await_ready().await;
        if self.is_stopped() {
            return;
        }

        if self.need_bind.load(Ordering::SeqCst) {
            self.check_bind_prompt();
            return;
        }

        let _ = self.text_tx.send(text);
    }

    /// Interrupt the current utterance without tearing the session down.
    pub fn abort_speaking(&self) {
        self.client_abort.store(true, Ordering::SeqCst);
        self.pacer.reset();
        self.providers.tts.abort();
        self.send_message(&ServerMessage::tts(
            self.session_id.clone(),
            TtsState::Stop,
            None,
        ));
        self.clear_speak_status();
        tracing::info!("Aborted current speech for {}", self.session_id);
    }

    /// Idempotent teardown: stops stages, releases providers, removes the
    /// connection from the registry.
    pub async fn close(&self) {
        if self.is_stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        // release anything parked on the bind gate
        let _ = self.bind_ready_tx.send(true);

        self.pacer.shutdown();
        self.providers.tts.abort();

        let dialogue = {
            let dialogue = self.dialogue.lock();
            dialogue.messages().to_vec()
        };
        if let Err(e) = self
            .providers
            .memory
            .save_memory(&dialogue, &self.session_id)
            .await
        {
            tracing::warn!("Failed to save dialogue to memory: {e}");
        }

        self.providers.close_all().await;

        if let Some(registry) = self.registry.upgrade() {
            registry.detach(&self.registry_key(), &self.session_id);
        }

        tracing::info!("Connection closed: {}", self.session_id);

        // cancel the background stages last; close() may run on one of them
        let tasks: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock();
            tasks.drain(..).collect()
        };
        for task in tasks {
            task.abort();
        }
    }

    // ---- binding --------------------------------------------------------

    /// Put the connection into binding-pending mode with an optional
    /// pairing code.
    pub fn set_binding(&self, code: Option<String>) {
        self.need_bind.store(true, Ordering::SeqCst);
        *self.bind_code.write() = code;
    }

    /// Signal that connection setup is complete; parked inbound work
    /// resumes.
    pub fn mark_ready(&self) {
        let _ = self.bind_ready_tx.send(true);
    }

    async fn await_ready(&self) {
        let mut rx = self.bind_ready_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Throttled bind-code prompt; at most one per interval.
    fn check_bind_prompt(&self) {
        let now_s = now_ms() / 1000;
        let last = self.last_bind_prompt_s.load(Ordering::SeqCst);
        if now_s.saturating_sub(last) < BIND_PROMPT_INTERVAL_SECS {
            return;
        }
        if self
            .last_bind_prompt_s
            .compare_exchange(last, now_s, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.send_bind_prompt();
    }

    fn send_bind_prompt(&self) {
        let text = match self.bind_code.read().as_deref() {
            Some(code) if code.len() == 6 => {
                format!("请登录控制面板，输入{code}，绑定设备。")
            }
            Some(code) => {
                tracing::error!("Invalid bind code format: {code}");
                "绑定码格式错误，请检查配置。".to_string()
            }
            None => "没有找到该设备的版本信息，请正确配置 OTA 地址，然后重新编译固件。".to_string(),
        };
        self.send_message(&ServerMessage::stt(self.session_id.clone(), text));
    }

    // ---- audio stage ----------------------------------------------------

    async fn process_audio_frame(self: &Arc<Self>, frame: Vec<u8>) {
        // wake-word cool-down: skip VAD entirely and discard audio
        if self.just_woken_up.load(Ordering::SeqCst) {
            self.audio_state.lock().asr_audio.clear();
            if !self.vad_resume_active.swap(true, Ordering::SeqCst) {
                let conn = Arc::clone(self);
                tokio::spawn(async move {
                    tokio::time::sleep(WAKE_COOLDOWN).await;
                    conn.just_woken_up.store(false, Ordering::SeqCst);
                    conn.vad_resume_active.store(false, Ordering::SeqCst);
                    tracing::debug!("VAD detection resumed for {}", conn.session_id);
                });
            }
            return;
        }

        let has_voice = match self.providers.vad.detect(&frame).await {
            Ok(result) => result.has_voice,
            Err(e) => {
                // transient VAD hiccups must not stall the segment
                tracing::debug!("VAD detection failed, assuming voice: {e}");
                true
            }
        };

        if has_voice
            && self.client_is_speaking.load(Ordering::SeqCst)
            && self.listen_mode() != ListenMode::Manual
        {
            self.abort_speaking();
        }

        if has_voice {
            let now = now_ms();
            self.last_voice_ms.store(now, Ordering::SeqCst);
            self.last_activity_ms.store(now, Ordering::SeqCst);
        } else {
            self.check_no_voice().await;
            if self.is_stopped() {
                return;
            }
        }

        let segment = {
            let mut state = self.audio_state.lock();
            let stopped = state.gate.observe(has_voice);

            if state.gate.have_voice() {
                while let Some(buffered) = state.pre_buffer.pop_front() {
                    state.asr_audio.push(buffered);
                }
                state.asr_audio.push(frame);
            } else {
                state.pre_buffer.push_back(frame);
                if state.pre_buffer.len() > PRE_BUFFER_FRAMES {
                    state.pre_buffer.pop_front();
                }
            }

            if stopped {
                state.gate.reset();
                Some(std::mem::take(&mut state.asr_audio))
            } else {
                None
            }
        };

        if let Some(frames) = segment {
            self.finish_segment(frames).await;
        }
    }

    /// Hand a completed speech segment to ASR and route the result.
    async fn finish_segment(self: &Arc<Self>, frames: Vec<Vec<u8>>) {
        if frames.len() < MIN_ASR_FRAMES {
            tracing::debug!(
                "Discarding short speech segment ({} frames)",
                frames.len()
            );
            return;
        }

        let audio: Vec<u8> = frames.concat();
        let audio_bytes = audio.len();
        match self.providers.asr.transcribe(&audio).await {
            Ok(Some(text)) if !text.trim().is_empty() => {
                tracing::info!("Recognized: {text}");
                self.enqueue_report(ReportKind::Asr, &text, audio_bytes);
                let _ = self.text_tx.send(text);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("ASR transcription failed: {e}"),
        }
    }

    /// Drive the farewell flow after a long stretch without voice.
    async fn check_no_voice(self: &Arc<Self>) {
        if self.close_after_chat.load(Ordering::SeqCst) {
            return;
        }
        let last_voice = self.last_voice_ms.load(Ordering::SeqCst);
        let no_voice_ms = now_ms().saturating_sub(last_voice);
        if no_voice_ms <= self.config.close_connection_no_voice_time * 1000 {
            return;
        }

        self.close_after_chat.store(true, Ordering::SeqCst);
        self.client_abort.store(false, Ordering::SeqCst);

        if !self.config.end_prompt_enabled {
            tracing::info!("Ending conversation without a farewell");
            self.close().await;
            return;
        }

        let _ = self.text_tx.send(self.config.end_prompt.clone());
    }

    // ---- text stage -----------------------------------------------------

    async fn process_text(self: &Arc<Self>, raw: String) {
        let (text, speaker) = parse_speaker_info(&raw);
        *self.current_speaker.write() = speaker;

        if self.need_bind.load(Ordering::SeqCst) {
            self.check_bind_prompt();
            return;
        }

        if self.config.max_output_size > 0
            && self.output_chars.load(Ordering::SeqCst) >= self.config.max_output_size
        {
            self.handle_max_output();
            return;
        }

        if self.client_is_speaking.load(Ordering::SeqCst)
            && self.listen_mode() != ListenMode::Manual
        {
            self.abort_speaking();
        }

        self.send_message(&ServerMessage::stt(self.session_id.clone(), text.clone()));

        let outcome = self
            .router
            .route(&text, self.providers.intent.as_ref(), &self.tools)
            .await;

        match outcome {
            RouteOutcome::CloseSession => self.close().await,
            RouteOutcome::WakeWord => {
                self.just_woken_up.store(true, Ordering::SeqCst);
            }
            RouteOutcome::EndPromptEcho => {
                // the device heard our own farewell; acknowledge playback
                // without another LLM turn
                self.send_message(&ServerMessage::tts(
                    self.session_id.clone(),
                    TtsState::Start,
                    None,
                ));
            }
            RouteOutcome::Handled(reply) => {
                if let Some(reply) = reply {
                    let conn = Arc::clone(self);
                    tokio::spawn(async move {
                        if let Err(e) = conn.speak_text(&reply).await {
                            tracing::warn!("Failed to speak intent reply: {e}");
                        }
                    });
                }
            }
            RouteOutcome::Unhandled => {
                let conn = Arc::clone(self);
                tokio::spawn(async move {
                    conn.chat(text).await;
                });
            }
        }
    }

    fn handle_max_output(&self) {
        self.client_abort.store(false, Ordering::SeqCst);
        self.send_message(&ServerMessage::stt(
            self.session_id.clone(),
            MAX_OUTPUT_TEXT,
        ));
        self.close_after_chat.store(true, Ordering::SeqCst);
    }

    // ---- outbound helpers -----------------------------------------------

    /// Serialize and send a control envelope. Send failures affect only
    /// this envelope.
    pub fn send_message(&self, message: &ServerMessage) {
        match serde_json::to_string(message) {
            Ok(payload) => {
                if self.outbound.send(OutboundFrame::Text(payload)).is_err() {
                    tracing::debug!("Outbound channel closed, dropping envelope");
                }
            }
            Err(e) => tracing::error!("Failed to encode server message: {e}"),
        }
    }

    /// Queue one synthesized packet for paced emission, gateway-wrapped
    /// when this connection arrived through the MQTT gateway.
    pub(crate) fn enqueue_paced_audio(&self, packet: Vec<u8>) {
        let framed = if self.config.from_gateway {
            let sequence = self.gateway_seq.fetch_add(1, Ordering::SeqCst) + 1;
            let timestamp = (now_ms() & u32::MAX as u64) as u32;
            gateway::wrap(&packet, sequence, timestamp)
        } else {
            packet
        };
        self.pacer.enqueue_audio(framed);
    }

    pub(crate) fn enqueue_report(&self, kind: ReportKind, text: &str, audio_bytes: usize) {
        let enabled = match kind {
            ReportKind::Asr => self.config.report_asr,
            ReportKind::Tts => self.config.report_tts,
        };
        if !enabled {
            return;
        }
        let _ = self.report_tx.send(ReportItem {
            kind,
            text: text.to_string(),
            audio_bytes,
            timestamp_ms: now_ms(),
        });
    }

    // ---- state accessors ------------------------------------------------

    pub fn is_stopped(&self) -> bool {
        self.is_stopped.load(Ordering::SeqCst)
    }

    pub fn is_speaking(&self) -> bool {
        self.is_speaking.load(Ordering::SeqCst)
    }

    pub fn listen_mode(&self) -> ListenMode {
        *self.listen_mode.read()
    }

    pub fn set_listen_mode(&self, mode: ListenMode) {
        *self.listen_mode.write() = mode;
    }

    pub fn current_speaker(&self) -> Option<String> {
        self.current_speaker.read().clone()
    }

    pub(crate) fn set_speaking(&self) {
        self.is_speaking.store(true, Ordering::SeqCst);
        self.client_is_speaking.store(true, Ordering::SeqCst);
    }

    pub(crate) fn clear_speak_status(&self) {
        self.is_speaking.store(false, Ordering::SeqCst);
        self.client_is_speaking.store(false, Ordering::SeqCst);
    }

    pub fn touch(&self) {
        self.last_activity_ms.store(now_ms(), Ordering::SeqCst);
    }

    /// Monotonic per-session sentence id, correlating a text segment with
    /// its audio across the TTS stages.
    pub(crate) fn next_sentence_id(&self) -> String {
        let n = self.sentence_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("sentence_{}_{n}", self.session_id)
    }

    pub(crate) fn registry_key(&self) -> String {
        ConnectionRegistry::connection_key(&self.device_id, &self.client_id)
    }
}

/// Extract `{"content": ..., "speaker": ...}` wrapping some gateways apply
/// to recognized text; plain text passes through unchanged.
fn parse_speaker_info(text: &str) -> (String, Option<String>) {
    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
            let content = value
                .get("content")
                .and_then(|v| v.as_str())
                .unwrap_or(trimmed)
                .to_string();
            let speaker = value
                .get("speaker")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            return (content, speaker);
        }
    }
    (trimmed.to_string(), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use voiceline_providers::build_providers;

    fn test_connection() -> (Arc<Connection>, mpsc::UnboundedReceiver<OutboundFrame>) {
        let providers =
            build_providers(&voiceline_config::ProviderSettings::default(), Vec::new()).unwrap();
        let tools = Arc::new(voiceline_tools::create_default_registry());
        let (conn, rx) = Connection::spawn(
            "device-1",
            "client-1",
            ConnectionConfig::default(),
            providers,
            tools,
            Weak::new(),
        );
        conn.mark_ready();
        (conn, rx)
    }

    #[test]
    fn test_parse_speaker_info() {
        let (text, speaker) = parse_speaker_info(r#"{"content": "你好", "speaker": "小明"}"#);
        assert_eq!(text, "你好");
        assert_eq!(speaker.as_deref(), Some("小明"));

        let (text, speaker) = parse_speaker_info("  plain text  ");
        assert_eq!(text, "plain text");
        assert!(speaker.is_none());
    }

    #[test]
    fn test_listen_mode_parse() {
        assert_eq!(ListenMode::parse("manual"), ListenMode::Manual);
        assert_eq!(ListenMode::parse("Manual"), ListenMode::Manual);
        assert_eq!(ListenMode::parse("auto"), ListenMode::Auto);
        assert_eq!(ListenMode::parse("anything"), ListenMode::Auto);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (conn, _rx) = test_connection();
        conn.close().await;
        assert!(conn.is_stopped());
        // second close is a no-op
        conn.close().await;
        assert!(conn.is_stopped());
    }

    #[tokio::test]
    async fn test_stopped_connection_rejects_input() {
        let (conn, mut rx) = test_connection();
        conn.close().await;
        // drain anything produced before the close
        while rx.try_recv().is_ok() {}

        conn.handle_text("你好".to_string()).await;
        conn.handle_audio(vec![0u8; 32]).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_abort_clears_speaking_and_pacer() {
        let (conn, _rx) = test_connection();
        conn.set_speaking();
        for i in 0..20u8 {
            conn.pacer.enqueue_audio(vec![i]);
        }
        conn.abort_speaking();
        assert!(!conn.is_speaking());
        assert_eq!(conn.pacer.queued_len(), 0);
        assert!(conn.client_abort.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_sentence_ids_are_monotonic() {
        let (conn, _rx) = test_connection();
        let first = conn.next_sentence_id();
        let second = conn.next_sentence_id();
        assert!(first.ends_with("_1"));
        assert!(second.ends_with("_2"));
        assert!(first.contains(&conn.session_id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_closes_connection() {
        let (conn, _rx) = test_connection();
        let timeout_ms = (conn.config.close_connection_no_voice_time + IDLE_GRACE_SECS) * 1000;
        conn.last_activity_ms
            .store(now_ms().saturating_sub(timeout_ms + 1000), Ordering::SeqCst);

        // let the 10s idle checker tick once
        tokio::time::sleep(IDLE_CHECK_INTERVAL + Duration::from_secs(1)).await;
        assert!(conn.is_stopped(), "idle checker did not close the session");
    }

    #[tokio::test]
    async fn test_bind_prompt_throttling() {
        let (conn, mut rx) = test_connection();
        conn.set_binding(Some("123456".to_string()));

        let now_s = now_ms() / 1000;

        // two triggers 10 seconds apart: second suppressed
        conn.last_bind_prompt_s
            .store(now_s.saturating_sub(10), Ordering::SeqCst);
        conn.check_bind_prompt();
        conn.check_bind_prompt();
        let mut prompts = 0;
        while rx.try_recv().is_ok() {
            prompts += 1;
        }
        assert_eq!(prompts, 0);

        // a trigger 61 seconds after the previous prompt goes through
        conn.last_bind_prompt_s
            .store(now_s.saturating_sub(61), Ordering::SeqCst);
        conn.check_bind_prompt();
        let mut prompts = 0;
        while rx.try_recv().is_ok() {
            prompts += 1;
        }
        assert_eq!(prompts, 1);
    }

    #[tokio::test]
    async fn test_bind_prompt_includes_code() {
        let (conn, mut rx) = test_connection();
        conn.set_binding(Some("654321".to_string()));
        conn.send_bind_prompt();
        match rx.recv().await.unwrap() {
            OutboundFrame::Text(payload) => assert!(payload.contains("654321")),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_binding_connection_prompts_instead_of_processing() {
        let (conn, mut rx) = test_connection();
        conn.set_binding(Some("111222".to_string()));

        conn.handle_text("你好".to_string()).await;
        tokio::task::yield_now().await;

        match rx.recv().await.unwrap() {
            OutboundFrame::Text(payload) => {
                // the bind prompt, not an stt echo of the utterance
                assert!(payload.contains("111222"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_gateway_audio_goes_through_reorder() {
        let providers =
            build_providers(&voiceline_config::ProviderSettings::default(), Vec::new()).unwrap();
        let tools = Arc::new(voiceline_tools::create_default_registry());
        let config = ConnectionConfig {
            from_gateway: true,
            ..ConnectionConfig::default()
        };
        let (conn, _rx) = Connection::spawn(
            "device-g",
            "client-g",
            config,
            providers,
            tools,
            Weak::new(),
        );
        conn.mark_ready();

        conn.handle_audio(gateway::wrap(&[1u8; 4], 0, 100)).await;
        // late frame buffers rather than being admitted
        conn.handle_audio(gateway::wrap(&[2u8; 4], 0, 50)).await;
        assert_eq!(conn.reorder.lock().buffered_len(), 1);
        assert_eq!(conn.reorder.lock().last_processed(), 100);
    }
}
