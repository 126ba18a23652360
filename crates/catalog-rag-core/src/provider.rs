//! Interfaces to the model providers.
//!
//! The core never talks HTTP. The application crate implements these
//! traits for OpenAI, Azure OpenAI and Ollama; tests implement them with
//! canned responses. Providers own their timeouts and report them as
//! [`ProviderError::Timeout`].

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::chat::{ChatCompletion, ChatCompletionChunk, CompletionRequest};
use crate::error::{ProviderError, RagError};

/// Upstream chunk sequence from a streaming completion.
pub type ChunkStream = BoxStream<'static, Result<ChatCompletionChunk, ProviderError>>;

/// Maps text to fixed-length vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Returns the configured vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;

    /// Embed a single text.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("empty embedding response".into()))
    }
}

/// Produces chat completions, whole or streamed.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Returns the model identifier used for token limits and traces.
    fn model_name(&self) -> &str;

    /// Deployment name, for hosts that route by deployment.
    fn deployment(&self) -> Option<&str> {
        None
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<ChatCompletion, ProviderError>;

    /// Start a streamed completion. Dropping the returned stream must
    /// release the underlying connection.
    async fn complete_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<ChunkStream, ProviderError>;
}

/// Embed one query and check its width against [`EmbeddingProvider::dims`].
pub async fn embed_query_checked(
    embedder: &dyn EmbeddingProvider,
    text: &str,
) -> crate::Result<Vec<f32>> {
    let vector = embedder
        .embed_query(text)
        .await
        .map_err(|e| RagError::provider("embedding", e))?;
    if vector.len() != embedder.dims() {
        return Err(RagError::EmbeddingDimensionMismatch {
            expected: embedder.dims(),
            actual: vector.len(),
        });
    }
    Ok(vector)
}
