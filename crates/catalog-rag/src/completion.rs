//! Chat completion client for OpenAI-compatible hosts.
//!
//! Streaming responses are server-sent events: `data: {json}` lines,
//! terminated by `data: [DONE]`. [`SseDecoder`] reassembles lines across
//! network chunk boundaries and the resulting stream yields one parsed
//! [`ChatCompletionChunk`] per event, pulling bytes only on demand.

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use catalog_rag_core::chat::{ChatCompletion, ChatCompletionChunk, CompletionRequest};
use catalog_rag_core::error::ProviderError;
use catalog_rag_core::provider::{ChunkStream, CompletionProvider};

use crate::config::ChatConfig;
use crate::openai::{check_status, request_error, Endpoint};

/// Maximum bytes buffered while waiting for a line break (1MB).
pub const MAX_LINE_BYTES: usize = 1_048_576;

pub struct OpenAiCompletion {
    client: reqwest::Client,
    endpoint: Endpoint,
    model: String,
    deployment: Option<String>,
}

#[derive(Serialize)]
struct Body<'a> {
    model: &'a str,
    #[serde(flatten)]
    request: &'a CompletionRequest,
}

impl OpenAiCompletion {
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let endpoint = Endpoint::new(
            &config.host,
            "chat/completions",
            config.endpoint.as_deref(),
            config.deployment.as_deref(),
            config.api_version.as_deref(),
        )?;
        // Streams stay open for the whole answer, so only connecting is
        // bounded by the client; the read timeout covers stalls.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .read_timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            model: config.model.clone(),
            deployment: config.deployment.clone(),
        })
    }

    async fn post(&self, request: &CompletionRequest) -> Result<reqwest::Response, ProviderError> {
        let body = Body {
            model: self.deployment.as_deref().unwrap_or(&self.model),
            request,
        };
        let response = self
            .endpoint
            .authorize(self.client.post(self.endpoint.url()))
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;
        check_status(response).await
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompletion {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn deployment(&self) -> Option<&str> {
        self.deployment.as_deref()
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<ChatCompletion, ProviderError> {
        let mut request = request.clone();
        request.stream = false;
        let response = self.post(&request).await?;
        response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }

    async fn complete_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<ChunkStream, ProviderError> {
        let mut request = request.clone();
        request.stream = true;
        let response = self.post(&request).await?;
        let bytes = response
            .bytes_stream()
            .map(|r| r.map(|b| b.to_vec()).map_err(request_error))
            .boxed();
        Ok(sse_chunks(bytes))
    }
}

pub fn create_completion(config: &ChatConfig) -> Result<Arc<dyn CompletionProvider>> {
    Ok(Arc::new(OpenAiCompletion::new(config)?))
}

/// One decoded server-sent event payload.
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    Data(String),
    Done,
}

/// Incremental `data:` line decoder.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and return every complete event they finish.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<SseEvent>, ProviderError> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = parse_line(&line)? {
                events.push(event);
            }
        }
        if self.buffer.len() > MAX_LINE_BYTES {
            return Err(ProviderError::InvalidResponse(format!(
                "event line exceeds {} bytes",
                MAX_LINE_BYTES
            )));
        }
        Ok(events)
    }

    /// Flush a trailing line that had no final newline.
    pub fn finish(&mut self) -> Result<Option<SseEvent>, ProviderError> {
        let line = std::mem::take(&mut self.buffer);
        parse_line(&line)
    }
}

fn parse_line(line: &[u8]) -> Result<Option<SseEvent>, ProviderError> {
    let line = std::str::from_utf8(line)
        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?
        .trim();
    let Some(data) = line.strip_prefix("data:") else {
        // Blank separators, comments, `event:` and `id:` lines.
        return Ok(None);
    };
    let data = data.trim();
    if data == "[DONE]" {
        Ok(Some(SseEvent::Done))
    } else if data.is_empty() {
        Ok(None)
    } else {
        Ok(Some(SseEvent::Data(data.to_string())))
    }
}

struct SseState<S> {
    bytes: S,
    decoder: SseDecoder,
    pending: VecDeque<SseEvent>,
    finished: bool,
}

/// Parse a byte stream of server-sent events into completion chunks.
pub fn sse_chunks<S>(bytes: S) -> ChunkStream
where
    S: futures::Stream<Item = Result<Vec<u8>, ProviderError>> + Send + Unpin + 'static,
{
    let state = SseState {
        bytes,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                match event {
                    SseEvent::Done => {
                        state.finished = true;
                        state.pending.clear();
                        return None;
                    }
                    SseEvent::Data(json) => {
                        let chunk = serde_json::from_str::<ChatCompletionChunk>(&json)
                            .map_err(|e| ProviderError::InvalidResponse(e.to_string()));
                        if chunk.is_err() {
                            state.finished = true;
                            state.pending.clear();
                        }
                        return Some((chunk, state));
                    }
                }
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(bytes)) => match state.decoder.push(&bytes) {
                    Ok(events) => state.pending.extend(events),
                    Err(e) => {
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                },
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(e), state));
                }
                None => {
                    state.finished = true;
                    match state.decoder.finish() {
                        Ok(Some(event)) => state.pending.push_back(event),
                        Ok(None) => {}
                        Err(e) => return Some((Err(e), state)),
                    }
                }
            }
        }
    })
    .boxed()
}
