//! OTA endpoint
//!
//! Devices poll this endpoint with their model and firmware version; the
//! response carries the server time, the newest matching firmware from the
//! local firmware directory, the WebSocket endpoint, and — when an MQTT
//! gateway is configured — the gateway credential block.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Path as UrlPath, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};

use crate::state::AppState;

fn now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Cached firmware directory listing: model → [(version, filename)],
/// newest first.
#[derive(Default)]
pub struct FirmwareCache {
    updated_at: u64,
    files_by_model: HashMap<String, Vec<(String, String)>>,
}

fn parse_version(version: &str) -> Vec<u64> {
    let parts: Vec<u64> = version
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect();
    if parts.is_empty() {
        vec![0]
    } else {
        parts
    }
}

fn is_higher_version(a: &str, b: &str) -> bool {
    let (ta, tb) = (parse_version(a), parse_version(b));
    let len = ta.len().max(tb.len());
    for i in 0..len {
        let ai = ta.get(i).copied().unwrap_or(0);
        let bi = tb.get(i).copied().unwrap_or(0);
        if ai != bi {
            return ai > bi;
        }
    }
    false
}

/// Split `model_1.2.3.bin` into model and version.
fn parse_firmware_name(name: &str) -> Option<(String, String)> {
    let stem = name.strip_suffix(".bin")?;
    let (model, version) = stem.rsplit_once('_')?;
    if model.is_empty() || !version.chars().next()?.is_ascii_digit() {
        return None;
    }
    Some((model.to_string(), version.to_string()))
}

fn scan_firmware_dir(dir: &Path) -> HashMap<String, Vec<(String, String)>> {
    let mut files_by_model: HashMap<String, Vec<(String, String)>> = HashMap::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return files_by_model;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some((model, version)) = parse_firmware_name(name) {
            files_by_model
                .entry(model)
                .or_default()
                .push((version, name.to_string()));
        }
    }
    for versions in files_by_model.values_mut() {
        versions.sort_by(|a, b| parse_version(&b.0).cmp(&parse_version(&a.0)));
    }
    files_by_model
}

fn latest_firmware(state: &AppState, model: &str) -> Option<(String, String)> {
    let ttl = state.settings.server.firmware_cache_ttl;
    let dir = PathBuf::from(&state.settings.server.firmware_dir);
    let now = now_seconds();

    let mut cache = state.firmware_cache.lock();
    let stale = match cache.as_ref() {
        Some(c) => now.saturating_sub(c.updated_at) >= ttl,
        None => true,
    };
    if stale {
        let files_by_model = scan_firmware_dir(&dir);
        tracing::info!("Firmware cache refreshed: {} models", files_by_model.len());
        *cache = Some(FirmwareCache {
            updated_at: now,
            files_by_model,
        });
    }

    cache
        .as_ref()
        .and_then(|c| c.files_by_model.get(model))
        .and_then(|versions| versions.first().cloned())
}

fn websocket_url(state: &AppState) -> String {
    let server = &state.settings.server;
    if server.websocket_url.is_empty() {
        format!("ws://{}:{}{}", server.host, server.port, server.ws_path)
    } else {
        server.websocket_url.clone()
    }
}

fn header_lookup(headers: &HeaderMap, candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// GET /ota — liveness probe with the advertised WebSocket address.
pub async fn ota_get(State(state): State<AppState>) -> String {
    format!(
        "OTA接口运行正常，向设备发送的websocket地址是：{}",
        websocket_url(&state)
    )
}

/// POST /ota — firmware and connection metadata for one device.
pub async fn ota_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<Value>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let Some(device_id) = header_lookup(&headers, &["device-id"]) else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "message": "OTA请求设备ID为空"})),
        ));
    };
    let body = body.map(|Json(v)| v);

    let mut device_model =
        header_lookup(&headers, &["device-model", "device_model", "model"]).unwrap_or_default();
    if device_model.is_empty() {
        device_model = body
            .as_ref()
            .and_then(|b| {
                b.pointer("/board/type")
                    .or_else(|| b.get("model"))
                    .and_then(Value::as_str)
            })
            .unwrap_or("")
            .to_string();
    }
    if device_model.is_empty() {
        device_model = "default".to_string();
    }

    let mut device_version = header_lookup(
        &headers,
        &[
            "device-version",
            "device_version",
            "firmware-version",
            "app-version",
            "application-version",
        ],
    )
    .unwrap_or_default();
    if device_version.is_empty() {
        device_version = body
            .as_ref()
            .and_then(|b| b.pointer("/application/version").and_then(Value::as_str))
            .unwrap_or("")
            .to_string();
    }
    if device_version.is_empty() {
        device_version = "0.0.0".to_string();
    }

    let mut firmware = json!({"version": device_version, "url": ""});
    if let Some((version, filename)) = latest_firmware(&state, &device_model) {
        if is_higher_version(&version, &device_version) {
            firmware = json!({
                "version": version,
                "url": format!("/ota/bin/{filename}"),
            });
        }
    }

    let mut response = json!({
        "server_time": {
            "timestamp": SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            "timezone_offset": state.settings.server.timezone_offset_minutes,
        },
        "firmware": firmware,
        "websocket": { "url": websocket_url(&state) },
    });

    let gateway = &state.settings.server.mqtt_gateway;
    if !gateway.is_empty() {
        let group_id = format!("GID_{}", device_model.replace([':', ' '], "_"));
        let mac_safe = device_id.replace(':', "_");
        let mqtt_client_id = format!("{group_id}@@@{mac_safe}@@@{mac_safe}");
        let username = BASE64.encode(r#"{"ip":"unknown"}"#);

        let signature_key = &state.settings.server.mqtt_signature_key;
        let password = if signature_key.is_empty() {
            tracing::warn!("MQTT signature key missing, issuing empty gateway password");
            String::new()
        } else {
            crate::auth::AuthManager::new(signature_key.clone(), 0)
                .sign_standard_base64(&format!("{mqtt_client_id}|{username}"))
        };

        response["mqtt"] = json!({
            "endpoint": gateway,
            "client_id": mqtt_client_id,
            "username": username,
            "password": password,
        });
    }

    tracing::debug!("OTA response for {device_id} (model {device_model})");
    Ok(Json(response))
}

/// GET /ota/bin/:filename — firmware image download.
pub async fn ota_download(
    State(state): State<AppState>,
    UrlPath(filename): UrlPath<String>,
) -> Result<impl IntoResponse, StatusCode> {
    // strip any path components a crafted request might carry
    let safe_name = Path::new(&filename)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or(StatusCode::BAD_REQUEST)?;
    if !safe_name.ends_with(".bin") {
        return Err(StatusCode::NOT_FOUND);
    }

    let path = PathBuf::from(&state.settings.server.firmware_dir).join(safe_name);
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok((
            [(axum::http::header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )),
        Err(_) => Err(StatusCode::NOT_FOUND),
    }
}
