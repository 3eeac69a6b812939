//! Wire types for the DeepSeek `/v1/chat/completions` endpoint
//!
//! The provider speaks the OpenAI-compatible chat completion contract. Only
//! the fields the relay actually sends or reads are modeled; everything else
//! is tolerated and ignored on deserialization.

use serde::{Deserialize, Serialize};

/// Chat completion request
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

impl ChatCompletionRequest {
    /// Single-turn user request, the only shape this relay sends
    pub fn user_prompt(model: &str, prompt: &str, temperature: f32, max_tokens: u32) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![ChatMessage {
                role: Role::User,
                content: prompt.to_string(),
            }],
            temperature,
            max_tokens,
            stream: None,
        }
    }

    pub fn streaming(mut self) -> Self {
        self.stream = Some(true);
        self
    }
}

/// Chat message
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Message author role
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Chat completion response envelope
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// Response choice
#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub message: Option<ResponseMessage>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Response message
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

/// Token usage
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Streaming chunk
#[derive(Debug, Clone, Deserialize)]
pub struct StreamChunk {
    pub choices: Vec<StreamChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// Streaming choice
#[derive(Debug, Clone, Deserialize)]
pub struct StreamChoice {
    pub delta: Delta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Streaming delta
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_prompt_request_shape() {
        let req = ChatCompletionRequest::user_prompt("deepseek-chat", "2+2?", 0.7, 1000);
        let json = serde_json::to_value(&req).unwrap();

        assert_eq!(json["model"], "deepseek-chat");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "2+2?");
        assert_eq!(json["temperature"], 0.7);
        assert_eq!(json["max_tokens"], 1000);
        // non-streaming requests omit the stream flag entirely
        assert!(json.get("stream").is_none());
    }

    #[test]
    fn test_streaming_flag() {
        let req = ChatCompletionRequest::user_prompt("deepseek-chat", "hi", 0.7, 100).streaming();
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["stream"], true);
    }

    #[test]
    fn test_response_parse_ignores_unknown_fields() {
        let body = r#"{
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "deepseek-chat",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "4"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 1, "total_tokens": 6}
        }"#;

        let response: ChatCompletionResponse = serde_json::from_str(body).unwrap();
        let message = response.choices[0].message.as_ref().unwrap();
        assert_eq!(message.content.as_deref(), Some("4"));
        assert_eq!(response.usage.unwrap().total_tokens, 6);
    }

    #[test]
    fn test_stream_chunk_parse() {
        let chunk = r#"{"choices":[{"index":0,"delta":{"content":"Recur"},"finish_reason":null}]}"#;
        let parsed: StreamChunk = serde_json::from_str(chunk).unwrap();
        assert_eq!(parsed.choices[0].delta.content.as_deref(), Some("Recur"));
        assert!(parsed.choices[0].finish_reason.is_none());
    }

    #[test]
    fn test_empty_choices_parse() {
        let body = r#"{"choices": []}"#;
        let response: ChatCompletionResponse = serde_json::from_str(body).unwrap();
        assert!(response.choices.is_empty());
    }
}
