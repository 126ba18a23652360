//! Error taxonomy for the retrieval and chat pipeline.
//!
//! Collaborator seams have their own error types ([`StoreError`],
//! [`ProviderError`]) so that store and provider implementations do not
//! need to know about pipeline stages. The orchestrator maps them into
//! [`RagError`], which is what callers see.
//!
//! Only rewrite-stage failures are absorbed (see [`crate::rewrite`]);
//! every other variant aborts the request.

use thiserror::Error;

/// Failure reported by a [`CatalogStore`](crate::store::CatalogStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("catalog store unavailable: {0}")]
    Unavailable(String),

    #[error("catalog query failed: {0}")]
    Query(String),
}

/// Failure reported by an embedding or completion provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(String),

    #[error("provider request timed out: {0}")]
    Timeout(String),

    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

/// Errors surfaced to callers of the search engine and the orchestrator.
#[derive(Debug, Error)]
pub enum RagError {
    /// Neither a text query nor a query vector was supplied.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The embedding provider returned a vector of unexpected length.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingDimensionMismatch { expected: usize, actual: usize },

    /// An embedding or completion call failed (including timeouts).
    #[error("{stage} failed: {source}")]
    ProviderUnavailable {
        stage: &'static str,
        #[source]
        source: ProviderError,
    },

    /// The catalog store could not serve a read.
    #[error("retrieval failed: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl RagError {
    pub(crate) fn provider(stage: &'static str, source: ProviderError) -> Self {
        RagError::ProviderUnavailable { stage, source }
    }

    /// Whether the error was caused by the caller rather than a collaborator.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, RagError::InvalidQuery(_))
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
