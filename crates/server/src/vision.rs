//! Vision endpoint
//!
//! Image-based Q&A for devices with cameras: a multipart request carries a
//! question and an image, answered by the configured LLM backend. Requires
//! a bearer token matching the device headers.

use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use futures::StreamExt;
use serde_json::{json, Value};

use voiceline_core::{DialogueMessage, Role};
use voiceline_providers::factory::create_llm;

use crate::state::AppState;

const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// Magic-number prefixes of the accepted image formats.
const IMAGE_SIGNATURES: &[&[u8]] = &[
    &[0xff, 0xd8, 0xff],             // JPEG
    &[0x89, 0x50, 0x4e, 0x47],       // PNG
    b"GIF87a",                       // GIF
    b"GIF89a",                       // GIF
    &[0x42, 0x4d],                   // BMP
    &[0x49, 0x49, 0x2a, 0x00],       // TIFF (II)
    &[0x4d, 0x4d, 0x00, 0x2a],       // TIFF (MM)
    b"RIFF",                         // WEBP
];

fn is_valid_image(data: &[u8]) -> bool {
    IMAGE_SIGNATURES
        .iter()
        .any(|signature| data.starts_with(signature))
}

fn error_response(status: StatusCode, message: &str) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(json!({"success": false, "message": message})),
    )
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// GET /vision — status probe.
pub async fn vision_get(State(state): State<AppState>) -> String {
    let server = &state.settings.server;
    format!(
        "Vision 接口运行正常，地址：http://{}:{}/vision",
        server.host, server.port
    )
}

/// POST /vision — answer a question about an uploaded image.
pub async fn vision_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let token = header_str(&headers, "authorization")
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| {
            error_response(StatusCode::UNAUTHORIZED, "无效的认证token或token已过期")
        })?;

    let device_id = header_str(&headers, "device-id")
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "缺少设备ID"))?
        .to_string();
    let client_id = header_str(&headers, "client-id")
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "缺少客户端ID"))?
        .to_string();

    if !state.auth.verify_token(token, &client_id, &device_id) {
        return Err(error_response(
            StatusCode::UNAUTHORIZED,
            "无效的认证token或token已过期",
        ));
    }

    let mut question: Option<String> = None;
    let mut image: Option<Vec<u8>> = None;

    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("question") => {
                question = field.text().await.ok();
            }
            Some("file") => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|_| error_response(StatusCode::BAD_REQUEST, "图片读取失败"))?;
                image = Some(data.to_vec());
            }
            _ => {}
        }
    }

    let question =
        question.ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "缺少问题字段"))?;
    let image = image.ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "图片数据为空"))?;

    if image.is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "图片数据为空"));
    }
    if image.len() > MAX_IMAGE_BYTES {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "图片大小超过限制，最大允许5MB",
        ));
    }
    if !is_valid_image(&image) {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "不支持的文件格式，请上传有效的图片文件",
        ));
    }

    let llm = create_llm(&state.settings.providers.llm)
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()))?;

    let messages = vec![
        DialogueMessage::new(Role::System, "你是一个视觉分析助手，请回答用户关于图片的问题。"),
        DialogueMessage::new(Role::User, question),
    ];
    let mut stream = llm
        .generate(&format!("vision-{device_id}"), &messages)
        .await
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()))?;

    let mut answer = String::new();
    while let Some(chunk) = stream.next().await {
        answer.push_str(&chunk);
    }

    Ok(Json(json!({
        "success": true,
        "action": "RESPONSE",
        "response": answer,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_signature_validation() {
        assert!(is_valid_image(&[0xff, 0xd8, 0xff, 0x00, 0x01]));
        assert!(is_valid_image(b"\x89PNG\r\n\x1a\nrest"));
        assert!(is_valid_image(b"GIF89a..."));
        assert!(is_valid_image(b"RIFFxxxxWEBP"));
        assert!(!is_valid_image(b"plain text"));
        assert!(!is_valid_image(&[]));
    }
}
