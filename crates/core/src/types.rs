//! Provider result types
//!
//! Shared data shapes exchanged between the session pipeline and the
//! pluggable VAD/ASR/LLM/TTS/Intent providers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of a single VAD detection call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceActivityResult {
    /// Whether the frame contains speech
    pub has_voice: bool,
    /// Detection confidence (0.0 - 1.0)
    pub confidence: f32,
    /// Detection timestamp (unix millis)
    pub timestamp_ms: i64,
}

/// A structured intent recognized from an utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentResult {
    /// Intent name (e.g. `play_music`, `get_weather`)
    pub name: String,
    /// Recognition confidence (0.0 - 1.0)
    pub confidence: f32,
    /// Extracted parameters
    #[serde(default)]
    pub parameters: Value,
}

/// Function declaration offered to the LLM for function-calling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON-schema parameter declaration
    pub parameters: Value,
}

/// A concrete function invocation inside a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Raw JSON-encoded arguments as produced by the LLM
    pub arguments: String,
}

impl FunctionCall {
    /// Parse the raw argument string into a JSON value.
    ///
    /// LLMs occasionally emit malformed argument JSON; callers get an
    /// empty object in that case rather than an error.
    pub fn parsed_arguments(&self) -> Value {
        serde_json::from_str(&self.arguments).unwrap_or_else(|_| Value::Object(Default::default()))
    }
}

/// An LLM-issued tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub function: FunctionCall,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
}

/// One element of a streaming function-calling LLM response.
#[derive(Debug, Clone)]
pub enum LlmDelta {
    /// A text chunk
    Text(String),
    /// A completed tool call
    ToolCall(ToolCall),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_call_parsed_arguments() {
        let call = FunctionCall {
            name: "get_weather".to_string(),
            arguments: r#"{"location": "广州"}"#.to_string(),
        };
        assert_eq!(call.parsed_arguments()["location"], "广州");
    }

    #[test]
    fn test_function_call_malformed_arguments() {
        let call = FunctionCall {
            name: "get_weather".to_string(),
            arguments: "not json".to_string(),
        };
        assert!(call.parsed_arguments().as_object().unwrap().is_empty());
    }

    #[test]
    fn test_intent_result_roundtrip() {
        let json = r#"{"name": "play_music", "confidence": 0.92, "parameters": {"song": "月亮代表我的心"}}"#;
        let intent: IntentResult = serde_json::from_str(json).unwrap();
        assert_eq!(intent.name, "play_music");
        assert_eq!(intent.parameters["song"], "月亮代表我的心");
    }
}
