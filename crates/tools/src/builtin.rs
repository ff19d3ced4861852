//! Builtin tools

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{ActionResponse, Tool, ToolError};

/// Weather lookup.
pub struct WeatherTool;

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "获取天气信息"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "城市名称，如：北京、上海"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, arguments: &Value) -> Result<ActionResponse, ToolError> {
        let location = arguments
            .get("location")
            .and_then(Value::as_str)
            .unwrap_or("广州");

        // TODO: wire a real weather backend behind this tool
        Ok(ActionResponse::response(format!(
            "{location} 今天天气晴朗，气温 25°C，湿度 60%"
        )))
    }
}

/// Music playback.
pub struct PlayMusicTool;

#[async_trait]
impl Tool for PlayMusicTool {
    fn name(&self) -> &str {
        "play_music"
    }

    fn description(&self) -> &str {
        "播放音乐"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "song": {
                    "type": "string",
                    "description": "歌曲名称或搜索关键词"
                },
                "volume": {
                    "type": "integer",
                    "description": "音量 (0-100)"
                }
            },
            "required": ["song"]
        })
    }

    async fn execute(&self, arguments: &Value) -> Result<ActionResponse, ToolError> {
        let song = arguments
            .get("song")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidParams("缺少必需参数: song".to_string()))?;

        let volume = arguments
            .get("volume")
            .and_then(Value::as_u64)
            .unwrap_or(50)
            .min(100);

        Ok(ActionResponse::response(format!(
            "正在播放：{song}，音量 {volume}"
        )))
    }
}

/// Farewell handling for an exit intent resolved through function-calling.
pub struct ExitIntentTool;

#[async_trait]
impl Tool for ExitIntentTool {
    fn name(&self) -> &str {
        "handle_exit_intent"
    }

    fn description(&self) -> &str {
        "处理退出意图"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, _arguments: &Value) -> Result<ActionResponse, ToolError> {
        Ok(ActionResponse::response("再见！"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolAction;

    #[tokio::test]
    async fn test_weather_defaults_location() {
        let response = WeatherTool.execute(&json!({})).await.unwrap();
        assert_eq!(response.action, ToolAction::Response);
        assert!(response.response.unwrap().contains("广州"));
    }

    #[tokio::test]
    async fn test_play_music_requires_song() {
        let result = PlayMusicTool.execute(&json!({"volume": 30})).await;
        assert!(matches!(result, Err(ToolError::InvalidParams(_))));
    }

    #[tokio::test]
    async fn test_play_music_clamps_volume() {
        let response = PlayMusicTool
            .execute(&json!({"song": "月亮代表我的心", "volume": 500}))
            .await
            .unwrap();
        assert!(response.response.unwrap().contains("音量 100"));
    }
}
