//! Wiring from configuration to the core components.
//!
//! Collaborators are constructed here once per process and passed into
//! [`HybridSearch`] and [`ChatPipeline`]; nothing is held in globals.

use anyhow::{Context, Result};
use std::sync::Arc;

use catalog_rag_core::pipeline::{ChatPipeline, PipelineSettings};
use catalog_rag_core::provider::{CompletionProvider, EmbeddingProvider};
use catalog_rag_core::search::{HybridSearch, SearchSettings};
use catalog_rag_core::store::CatalogStore;
use catalog_rag_core::tokens::TokenCounter;

use crate::completion::create_completion;
use crate::config::Config;
use crate::db::{self, Catalog};
use crate::embedding::create_embedder;

pub fn search_settings(config: &Config) -> SearchSettings {
    SearchSettings {
        rrf_k: config.retrieval.rrf_k,
        candidate_k: config.retrieval.candidate_k,
    }
}

pub fn pipeline_settings(config: &Config) -> PipelineSettings {
    PipelineSettings {
        token_limit: config.chat.effective_token_limit(),
        response_tokens: config.chat.response_tokens,
        temperature: config.chat.temperature,
        top: config.retrieval.top,
    }
}

/// Assemble a pipeline from explicit collaborators.
pub fn build_pipeline(
    config: &Config,
    store: Arc<dyn CatalogStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    completion: Arc<dyn CompletionProvider>,
) -> Result<ChatPipeline> {
    let counter = TokenCounter::for_model(&config.chat.model)
        .context("Failed to load tokenizer")?;
    Ok(ChatPipeline::new(
        HybridSearch::new(store, search_settings(config)),
        embedder,
        completion,
        counter,
        pipeline_settings(config),
    ))
}

/// Everything a serving process needs.
pub struct AppContext {
    pub catalog: Catalog,
    pub pipeline: Arc<ChatPipeline>,
}

impl AppContext {
    pub async fn from_config(config: &Config) -> Result<Self> {
        let catalog = db::connect(config).await?;
        let embedder = create_embedder(&config.embedding)?;
        let completion = create_completion(&config.chat)?;
        let pipeline = build_pipeline(config, catalog.store(), embedder, completion)?;
        tracing::info!(
            backend = catalog.backend(),
            chat_host = %config.chat.host,
            chat_model = %config.chat.model,
            embeddings = %config.embedding.provider,
            "pipeline ready"
        );
        Ok(Self {
            catalog,
            pipeline: Arc::new(pipeline),
        })
    }
}
