//! Chat flow
//!
//! Drives one LLM turn: streams text chunks into TTS, paces the audio out,
//! dispatches tool calls, and falls back to a fixed apology when the LLM
//! is unavailable.

use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use voiceline_core::{DialogueMessage, FunctionDef, LlmDelta, ServerMessage, ToolCall, TtsState};
use voiceline_providers::TextStream;
use voiceline_tools::ToolAction;

use crate::connection::{Connection, ReportKind};
use crate::SessionError;

/// Recursion cap for tool-call follow-up turns.
const MAX_TOOL_DEPTH: usize = 5;

/// Spoken when the LLM fails outright.
pub const APOLOGY_TEXT: &str = "抱歉，我暂时无法回复";

impl Connection {
    /// Run one full chat turn for an utterance that fell through intent
    /// routing. Never propagates errors; an LLM failure becomes a normal
    /// apology turn.
    pub(crate) async fn chat(self: &Arc<Self>, text: String) {
        if self.is_stopped() {
            return;
        }
        self.client_abort
            .store(false, std::sync::atomic::Ordering::SeqCst);

        self.dialogue.lock().push_user(&text);

        let memory = match self.providers.memory.query_memory(&text).await {
            Ok(memory) => memory,
            Err(e) => {
                tracing::warn!("Memory query failed: {e}");
                None
            }
        };
        let messages = self.dialogue.lock().for_llm(memory.as_deref());
        let functions = self.providers.intent.functions();

        let outcome = if functions.is_empty() {
            self.chat_plain(&messages).await
        } else {
            self.chat_with_functions(messages, &functions, 0).await
        };

        if let Err(e) = outcome {
            tracing::error!("Chat flow failed: {e}");
            if let Err(e) = self.speak_text(APOLOGY_TEXT).await {
                tracing::warn!("Failed to speak apology: {e}");
            }
        }

        if self
            .close_after_chat
            .load(std::sync::atomic::Ordering::SeqCst)
            && !self.is_stopped()
        {
            tracing::info!("Closing connection after final chat turn");
            self.close().await;
        }
    }

    async fn chat_plain(
        self: &Arc<Self>,
        messages: &[DialogueMessage],
    ) -> Result<(), SessionError> {
        let stream = self
            .providers
            .llm
            .generate(&self.session_id, messages)
            .await?;
        self.speak_stream(stream).await
    }

    async fn chat_with_functions(
        self: &Arc<Self>,
        messages: Vec<DialogueMessage>,
        functions: &[FunctionDef],
        depth: usize,
    ) -> Result<(), SessionError> {
        if depth >= MAX_TOOL_DEPTH {
            tracing::warn!("Tool-call depth limit reached, stopping follow-up turns");
            return Ok(());
        }

        let mut stream = self
            .providers
            .llm
            .generate_with_functions(&self.session_id, &messages, functions)
            .await?;

        // speak text deltas while collecting tool calls from the same stream
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel::<String>();
        let speaker = Arc::clone(self);
        let speak_task = tokio::spawn(async move {
            let chunks: TextStream = Box::pin(UnboundedReceiverStream::new(chunk_rx));
            speaker.speak_stream(chunks).await
        });

        let mut tool_calls: Vec<ToolCall> = Vec::new();
        while let Some(delta) = stream.next().await {
            if self.is_stopped() {
                break;
            }
            match delta {
                LlmDelta::Text(chunk) => {
                    let _ = chunk_tx.send(chunk);
                }
                LlmDelta::ToolCall(call) => tool_calls.push(call),
            }
        }
        drop(chunk_tx);

        match speak_task.await {
            Ok(result) => result?,
            Err(e) => tracing::warn!("Speak task failed: {e}"),
        }

        for (index, call) in tool_calls.into_iter().enumerate() {
            if self.is_stopped()
                || self
                    .client_abort
                    .load(std::sync::atomic::Ordering::SeqCst)
            {
                break;
            }

            let name = call.function.name.clone();
            let arguments = call.function.parsed_arguments();
            let action = self.tools.execute(&name, &arguments).await;
            tracing::debug!("Tool {name} finished with action {:?}", action.action);

            match action.action {
                ToolAction::Response | ToolAction::NotFound | ToolAction::Error => {
                    if let Some(reply) = action.response {
                        self.speak_text(&reply).await?;
                    }
                }
                ToolAction::RequestLlm => {
                    let result = action.result.unwrap_or_default();
                    let call_id = call
                        .id
                        .clone()
                        .unwrap_or_else(|| format!("call_{depth}_{index}"));
                    {
                        let mut dialogue = self.dialogue.lock();
                        dialogue.push(DialogueMessage::assistant_tool_calls(
                            "",
                            vec![call.clone()],
                        ));
                        dialogue.push(DialogueMessage::tool_result(call_id, result));
                    }
                    let next = self.dialogue.lock().for_llm(None);
                    Box::pin(self.chat_with_functions(next, functions, depth + 1)).await?;
                }
                ToolAction::None => {}
            }
        }

        Ok(())
    }

    /// Synthesize and pace out a single fixed text.
    pub(crate) async fn speak_text(self: &Arc<Self>, text: &str) -> Result<(), SessionError> {
        let text = text.to_string();
        let stream: TextStream = Box::pin(futures::stream::once(async move { text }));
        self.speak_stream(stream).await
    }

    /// Feed a text stream through TTS and the pacer, bracketed by TTS
    /// start/stop envelopes. The abort flag is checked before every packet
    /// emission.
    pub(crate) async fn speak_stream(self: &Arc<Self>, text: TextStream) -> Result<(), SessionError> {
        if self.is_stopped() {
            return Err(SessionError::Stopped);
        }

        let sentence_id = self.next_sentence_id();
        self.set_speaking();

        let conn = Arc::clone(self);
        self.pacer.enqueue_message(Box::new(move || {
            conn.send_message(&ServerMessage::tts(
                conn.session_id.clone(),
                TtsState::Start,
                None,
            ));
        }));

        // capture the chunks while they stream into synthesis
        let spoken = Arc::new(Mutex::new(String::new()));
        let sink = Arc::clone(&spoken);
        let inspected: TextStream = Box::pin(text.inspect(move |chunk| {
            sink.lock().push_str(chunk);
        }));

        let mut audio = self.providers.tts.synthesize_stream(inspected);
        let mut audio_bytes = 0usize;
        let mut aborted = false;
        while let Some(packet) = audio.next().await {
            if self.is_stopped()
                || self
                    .client_abort
                    .load(std::sync::atomic::Ordering::SeqCst)
            {
                aborted = true;
                break;
            }
            audio_bytes += packet.len();
            self.enqueue_paced_audio(packet);
        }
        drop(audio);

        let spoken = spoken.lock().clone();
        if !spoken.is_empty() {
            self.dialogue.lock().push_assistant(&spoken);
            self.output_chars
                .fetch_add(spoken.chars().count(), std::sync::atomic::Ordering::SeqCst);
            self.send_message(&ServerMessage::assistant_text(
                self.session_id.clone(),
                spoken.clone(),
            ));
            self.enqueue_report(ReportKind::Tts, &spoken, audio_bytes);
        }

        if aborted {
            // abort_speaking already drained the pacer and cleared flags
            self.clear_speak_status();
            tracing::debug!("Utterance {sentence_id} aborted mid-stream");
        } else {
            let conn = Arc::clone(self);
            let sid = sentence_id.clone();
            self.pacer.enqueue_message(Box::new(move || {
                conn.send_message(&ServerMessage::tts(
                    conn.session_id.clone(),
                    TtsState::Stop,
                    None,
                ));
                conn.clear_speak_status();
                tracing::debug!("Utterance {sid} fully paced out");
            }));
        }

        Ok(())
    }
}
