//! Scripted collaborators for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::json;

use crate::chat::{ChatCompletion, ChatCompletionChunk, CompletionRequest};
use crate::error::ProviderError;
use crate::models::Item;
use crate::provider::{ChunkStream, CompletionProvider, EmbeddingProvider};

pub fn item(id: i64, name: &str, description: &str, price: f64, embedding: Vec<f32>) -> Item {
    Item {
        id,
        item_type: "Gear".into(),
        brand: "Daybird".into(),
        name: name.into(),
        description: description.into(),
        price,
        embedding: Some(embedding),
    }
}

pub fn text_completion(text: &str) -> ChatCompletion {
    serde_json::from_value(json!({
        "id": "cmpl-test",
        "object": "chat.completion",
        "created": 1,
        "model": "gpt-4o-mini",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop"
        }]
    }))
    .unwrap()
}

pub fn tool_completion(name: &str, arguments: &str) -> ChatCompletion {
    serde_json::from_value(json!({
        "id": "cmpl-test",
        "object": "chat.completion",
        "created": 1,
        "model": "gpt-4o-mini",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_0",
                    "type": "function",
                    "function": {"name": name, "arguments": arguments}
                }]
            },
            "finish_reason": "tool_calls"
        }]
    }))
    .unwrap()
}

pub fn content_chunk(text: &str) -> ChatCompletionChunk {
    serde_json::from_value(json!({
        "id": "chunk",
        "object": "chat.completion.chunk",
        "choices": [{"index": 0, "delta": {"content": text}, "finish_reason": null}]
    }))
    .unwrap()
}

pub fn empty_chunk() -> ChatCompletionChunk {
    serde_json::from_value(json!({"choices": [], "prompt_filter_results": []})).unwrap()
}

/// Completion provider that replays queued responses and records requests.
#[derive(Default)]
pub struct ScriptedCompletion {
    responses: Mutex<VecDeque<Result<ChatCompletion, ProviderError>>>,
    streams: Mutex<VecDeque<Vec<Result<ChatCompletionChunk, ProviderError>>>>,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, response: Result<ChatCompletion, ProviderError>) -> Self {
        self.responses.lock().unwrap().push_back(response);
        self
    }

    pub fn stream(self, chunks: Vec<Result<ChatCompletionChunk, ProviderError>>) -> Self {
        self.streams.lock().unwrap().push_back(chunks);
        self
    }

    pub fn recorded(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedCompletion {
    fn model_name(&self) -> &str {
        "gpt-4o-mini"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<ChatCompletion, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Request("no scripted response".into())))
    }

    async fn complete_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<ChunkStream, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        let chunks = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::Request("no scripted stream".into()))?;
        Ok(stream::iter(chunks).boxed())
    }
}

/// Embedding provider that returns one fixed vector and records inputs.
pub struct FixedEmbedding {
    pub vector: Vec<f32>,
    pub dims: usize,
    pub inputs: Mutex<Vec<String>>,
}

impl FixedEmbedding {
    pub fn new(vector: Vec<f32>) -> Self {
        let dims = vector.len();
        Self {
            vector,
            dims,
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Claim `dims` while returning vectors of a different length.
    pub fn misreporting(vector: Vec<f32>, dims: usize) -> Self {
        Self {
            dims,
            ..Self::new(vector)
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FixedEmbedding {
    fn model_name(&self) -> &str {
        "text-embedding-3-small"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.inputs.lock().unwrap().extend(texts.iter().cloned());
        Ok(texts.iter().map(|_| self.vector.clone()).collect())
    }
}
