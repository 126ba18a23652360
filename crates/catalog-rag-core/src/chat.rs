//! OpenAI-compatible chat completion wire types.
//!
//! Requests are built by the rewriter and the orchestrator; responses and
//! stream chunks come back from a [`CompletionProvider`](crate::provider::CompletionProvider).
//! Response types keep unknown fields in `extra` at every level (completion,
//! choice, message and delta) so chunks can be forwarded to callers without
//! losing provider data.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::{ChatMessage, Role};

pub const CHUNK_OBJECT: &str = "chat.completion.chunk";

/// A function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn function(name: &str, description: &str, parameters: Value) -> Self {
        Self {
            kind: "function".to_string(),
            function: FunctionDefinition {
                name: name.to_string(),
                description: description.to_string(),
                parameters,
            },
        }
    }
}

/// Provider-agnostic completion request. The provider adds the model or
/// deployment name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub n: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    pub stream: bool,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>, temperature: f32) -> Self {
        Self {
            messages,
            temperature,
            max_tokens: None,
            n: 1,
            tools: Vec::new(),
            tool_choice: None,
            stream: false,
        }
    }
}

/// A complete (non-streamed) chat completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: u64,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<CompletionChoice>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatCompletion {
    pub fn first_message(&self) -> Option<&ResponseMessage> {
        self.choices.first().map(|c| &c.message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionChoice {
    #[serde(default)]
    pub index: u32,
    pub message: ResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
    /// Retrieval trace attached by the orchestrator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResponseMessage {
    #[serde(default = "assistant_role")]
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn assistant_role() -> Role {
    Role::Assistant
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Raw JSON text as produced by the model; may be malformed.
    #[serde(default)]
    pub arguments: String,
}

/// One streamed chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default = "chunk_object")]
    pub object: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub created: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn chunk_object() -> String {
    CHUNK_OBJECT.to_string()
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: Delta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_tool_call_completion() {
        let raw = json!({
            "id": "cmpl-1",
            "object": "chat.completion",
            "created": 1,
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "search_database", "arguments": "{\"search_query\":\"red shoes\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"total_tokens": 12}
        });
        let completion: ChatCompletion = serde_json::from_value(raw).unwrap();
        let msg = completion.first_message().unwrap();
        assert_eq!(msg.content, None);
        assert_eq!(msg.tool_calls[0].function.name, "search_database");
        assert!(completion.extra.contains_key("usage"));
    }

    #[test]
    fn test_chunk_keeps_unknown_fields() {
        let raw = json!({
            "id": "c",
            "object": "chat.completion.chunk",
            "created": 5,
            "model": "m",
            "system_fingerprint": "fp",
            "choices": [{"index": 0, "delta": {"content": "Hi"}, "finish_reason": null}]
        });
        let chunk: ChatCompletionChunk = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hi"));
        let back = serde_json::to_value(&chunk).unwrap();
        assert_eq!(back["system_fingerprint"], "fp");
        assert_eq!(back["choices"][0]["delta"], json!({"content": "Hi"}));
    }

    #[test]
    fn test_completion_round_trip_keeps_nested_fields() {
        let raw = json!({
            "id": "cmpl-2",
            "object": "chat.completion",
            "created": 7,
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hello", "refusal": null},
                "finish_reason": "stop",
                "logprobs": null,
                "content_filter_results": {"hate": {"filtered": false, "severity": "safe"}}
            }],
            "usage": {"total_tokens": 9}
        });
        let completion: ChatCompletion = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(
            completion.choices[0].message.extra.get("refusal"),
            Some(&Value::Null)
        );
        assert_eq!(serde_json::to_value(&completion).unwrap(), raw);
    }

    #[test]
    fn test_chunk_with_empty_choices_parses() {
        let chunk: ChatCompletionChunk =
            serde_json::from_value(json!({"choices": [], "prompt_filter_results": []})).unwrap();
        assert!(chunk.choices.is_empty());
        assert_eq!(chunk.object, CHUNK_OBJECT);
    }

    #[test]
    fn test_request_omits_empty_tools() {
        let req = CompletionRequest::new(vec![ChatMessage::user("hi")], 0.3);
        let v = serde_json::to_value(&req).unwrap();
        assert!(v.get("tools").is_none());
        assert_eq!(v["messages"][0], json!({"role": "user", "content": "hi"}));
    }
}
