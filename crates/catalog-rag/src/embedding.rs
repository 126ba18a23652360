//! Embedding client for OpenAI-compatible hosts.
//!
//! Implements the core [`EmbeddingProvider`] over `POST {url}/embeddings`.
//! `text-embedding-3-*` models accept an explicit `dimensions` field, which
//! is always sent for them so the vector width never depends on a model
//! default; older models (e.g. `text-embedding-ada-002`) reject it.
//!
//! # Retry Strategy
//!
//! Only used by the offline `crag embed` job (`embedding.max_retries`,
//! default 0). Query-time embedding goes through the same client with
//! retries disabled.
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use catalog_rag_core::error::ProviderError;
use catalog_rag_core::provider::EmbeddingProvider;

use crate::config::EmbeddingConfig;
use crate::openai::{check_status, request_error, Endpoint};

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: Endpoint,
    model: String,
    dims: usize,
    max_retries: u32,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// Whether the model accepts the `dimensions` request field.
pub fn supports_dimensions(model: &str) -> bool {
    model.starts_with("text-embedding-3")
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required"))?;
        let endpoint = Endpoint::new(
            &config.provider,
            "embeddings",
            config.endpoint.as_deref(),
            config.deployment.as_deref(),
            config.api_version.as_deref(),
        )?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            model,
            dims,
            max_retries: config.max_retries,
        })
    }

    /// Same client with a different retry budget.
    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    async fn send(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: supports_dimensions(&self.model).then_some(self.dims),
        };
        let request = self
            .endpoint
            .authorize(self.client.post(self.endpoint.url()))
            .json(&body);
        let response = request.send().await.map_err(request_error)?;
        let response = check_status(response).await?;
        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        order_embeddings(parsed, texts.len())
    }
}

/// Sort by `index` so output order matches input order.
fn order_embeddings(
    mut parsed: EmbeddingResponse,
    expected: usize,
) -> Result<Vec<Vec<f32>>, ProviderError> {
    if parsed.data.len() != expected {
        return Err(ProviderError::InvalidResponse(format!(
            "expected {} embeddings, got {}",
            expected,
            parsed.data.len()
        )));
    }
    parsed.data.sort_by_key(|d| d.index);
    Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
}

fn is_retryable(e: &ProviderError) -> bool {
    match e {
        ProviderError::Status { status, .. } => *status == 429 || *status >= 500,
        ProviderError::Request(_) | ProviderError::Timeout(_) => true,
        ProviderError::InvalidResponse(_) => false,
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut attempt = 0;
        loop {
            match self.send(texts).await {
                Ok(v) => return Ok(v),
                Err(e) if attempt < self.max_retries && is_retryable(&e) => {
                    attempt += 1;
                    // Exponential backoff: 1s, 2s, 4s, 8s, ...
                    let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                    tracing::warn!(attempt, ?delay, "embedding request failed, retrying: {}", e);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Query-time embedder, or `None` when embeddings are disabled.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Option<Arc<dyn EmbeddingProvider>>> {
    if !config.is_enabled() {
        return Ok(None);
    }
    let embedder = OpenAiEmbedder::new(config)?.with_retries(0);
    Ok(Some(Arc::new(embedder)))
}
