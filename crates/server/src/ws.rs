//! Device WebSocket endpoint
//!
//! Upgrades a device connection, binds providers, and bridges the socket
//! to the session's queues: inbound frames go to `handle_audio` /
//! `handle_text`, outbound frames drain from the connection's channel.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use rand::Rng;

use voiceline_core::{AudioParams, DeviceMessage, ServerMessage};
use voiceline_providers::build_providers;
use voiceline_session::{Connection, ConnectionConfig, ListenMode, OutboundFrame};

use crate::state::AppState;

/// Header the MQTT gateway adds when bridging a device.
const GATEWAY_TRANSPORT_HEADER: &str = "x-gateway-transport";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, StatusCode> {
    let Some(device_id) = header_str(&headers, "device-id").map(str::to_string) else {
        tracing::warn!("Connection rejected: missing device-id header");
        return Err(StatusCode::BAD_REQUEST);
    };
    let client_id = header_str(&headers, "client-id")
        .unwrap_or("default")
        .to_string();

    if state.settings.server.auth.enabled {
        let token = header_str(&headers, header::AUTHORIZATION.as_str())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(StatusCode::UNAUTHORIZED)?;
        if !state.auth.verify_token(token, &client_id, &device_id) {
            tracing::warn!("Invalid token for device {device_id}");
            return Err(StatusCode::UNAUTHORIZED);
        }
    }

    let from_gateway = headers.contains_key(GATEWAY_TRANSPORT_HEADER);

    Ok(ws.on_upgrade(move |socket| {
        handle_socket(socket, state, device_id, client_id, from_gateway)
    }))
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    device_id: String,
    client_id: String,
    from_gateway: bool,
) {
    let functions = state.tools.function_defs();
    let providers = match build_providers(&state.settings.providers, functions) {
        Ok(providers) => providers,
        Err(e) => {
            // a provider that fails to construct leaves the session
            // non-functional; refuse the connection instead
            tracing::error!("Provider setup failed for {device_id}: {e}");
            return;
        }
    };
    if let Err(e) = providers.asr.open_audio_channels().await {
        tracing::warn!("ASR channel setup failed for {device_id}: {e}");
    }
    if let Err(e) = providers.memory.init_memory(&device_id, None).await {
        tracing::warn!("Memory init failed for {device_id}: {e}");
    }

    let config = ConnectionConfig::from_settings(&state.settings, from_gateway);
    let (conn, mut outbound_rx, replaced) = state.registry.create(
        &device_id,
        &client_id,
        config,
        providers,
        state.tools.clone(),
    );
    if let Some(old) = replaced {
        old.close().await;
    }

    let auth = &state.settings.server.auth;
    if auth.enabled && !auth.allowed_devices.is_empty() && !auth.allowed_devices.contains(&device_id)
    {
        conn.set_binding(Some(generate_bind_code()));
    }

    let (mut sink, mut stream) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let message = match frame {
                OutboundFrame::Text(text) => Message::Text(text),
                OutboundFrame::Binary(data) => Message::Binary(data),
            };
            if let Err(e) = sink.send(message).await {
                tracing::debug!("Outbound send failed: {e}");
                break;
            }
        }
    });

    conn.send_message(&ServerMessage::Hello {
        version: 1,
        transport: "websocket".to_string(),
        audio_params: AudioParams::default(),
        session_id: conn.session_id.clone(),
    });
    conn.send_message(&ServerMessage::State {
        session_id: conn.session_id.clone(),
        state: "listening".to_string(),
    });
    conn.mark_ready();
    tracing::info!(
        "Device connected: {device_id} (session {}, gateway: {from_gateway})",
        conn.session_id
    );

    while let Some(message) = stream.next().await {
        if conn.is_stopped() {
            break;
        }
        match message {
            Ok(Message::Text(text)) => handle_device_envelope(&conn, &text).await,
            Ok(Message::Binary(data)) => conn.handle_audio(data).await,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::warn!("WebSocket receive error: {e}");
                break;
            }
        }
    }

    conn.close().await;
    writer.abort();
    tracing::info!("WebSocket closed for session {}", conn.session_id);
}

async fn handle_device_envelope(conn: &Connection, raw: &str) {
    match serde_json::from_str::<DeviceMessage>(raw) {
        Ok(DeviceMessage::Hello { version, .. }) => {
            tracing::debug!("Device hello (version {version})");
        }
        Ok(DeviceMessage::Text { text }) => conn.handle_text(text).await,
        Ok(DeviceMessage::Listen { mode, state }) => {
            if let Some(mode) = mode {
                conn.set_listen_mode(ListenMode::parse(&mode));
            }
            if state.as_deref() == Some("detect") {
                // device-side wake word detection reported; nothing to do
                // until audio follows
                tracing::debug!("Device reported wake-word detection");
            }
        }
        Ok(DeviceMessage::Abort) => conn.abort_speaking(),
        Ok(DeviceMessage::Config { features }) => {
            tracing::debug!("Device config update: {features}");
        }
        Err(e) => {
            tracing::warn!("Unparseable device envelope ({e}): {raw}");
        }
    }
}

fn generate_bind_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_code_is_six_digits() {
        for _ in 0..100 {
            let code = generate_bind_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }
}
