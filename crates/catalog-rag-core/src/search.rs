//! Hybrid search engine: vector + keyword retrieval fused with RRF.
//!
//! The engine operates entirely through the [`CatalogStore`] trait. The
//! caller supplies the query text and/or a pre-computed query vector.
//!
//! # Algorithm
//!
//! 1. Both inputs empty → [`RagError::InvalidQuery`], no store call.
//! 2. Only one input → that sub-ranking alone, truncated to `top_k`.
//! 3. Both inputs → [`CatalogStore::hybrid_ranking`]: `N` candidates from
//!    each sub-query (issued concurrently), fused with
//!    `1/(k + rank_v) + 1/(k + rank_k)`, sorted by score then id.
//! 4. Hydrate ids into items, preserving rank order.
//!
//! Filters apply inside both sub-queries.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{RagError, Result};
use crate::filter::SearchFilter;
use crate::fusion::{self, DEFAULT_RRF_K};
use crate::models::{RankedResult, ScoredItem};
use crate::store::{CatalogStore, HybridQuery};

/// Default number of candidates kept per sub-ranking.
pub const DEFAULT_CANDIDATE_K: usize = 20;

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, Copy)]
pub struct SearchSettings {
    pub rrf_k: u32,
    pub candidate_k: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            rrf_k: DEFAULT_RRF_K,
            candidate_k: DEFAULT_CANDIDATE_K,
        }
    }
}

/// One retrieval request. Empty text and empty vectors count as absent.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchRequest {
    pub query_text: Option<String>,
    #[serde(skip)]
    pub query_vector: Option<Vec<f32>>,
    pub top_k: usize,
    pub filters: Vec<SearchFilter>,
}

impl SearchRequest {
    fn text(&self) -> Option<&str> {
        self.query_text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    fn vector(&self) -> Option<&[f32]> {
        self.query_vector.as_deref().filter(|v| !v.is_empty())
    }
}

/// Fused retrieval over a [`CatalogStore`].
#[derive(Clone)]
pub struct HybridSearch {
    store: Arc<dyn CatalogStore>,
    settings: SearchSettings,
}

impl HybridSearch {
    pub fn new(store: Arc<dyn CatalogStore>, settings: SearchSettings) -> Self {
        Self { store, settings }
    }

    /// Rank item ids without hydrating them.
    pub async fn rank(&self, req: &SearchRequest) -> Result<Vec<RankedResult>> {
        let k = self.settings.rrf_k;
        let candidate_k = self.settings.candidate_k.max(req.top_k);

        let ranked = match (req.text(), req.vector()) {
            (None, None) => {
                return Err(RagError::InvalidQuery(
                    "either query text or a query vector is required".into(),
                ))
            }
            (Some(text), None) => {
                let ids = self
                    .store
                    .keyword_ranking(text, candidate_k, &req.filters)
                    .await?;
                fusion::single(&ids, k, req.top_k)
            }
            (None, Some(vector)) => {
                let ids = self
                    .store
                    .vector_ranking(vector, candidate_k, &req.filters)
                    .await?;
                fusion::single(&ids, k, req.top_k)
            }
            (Some(text), Some(vector)) => {
                let query = HybridQuery {
                    query_text: text,
                    query_vector: vector,
                    rrf_k: k,
                    candidate_k,
                    top_k: req.top_k,
                    filters: &req.filters,
                };
                let mut fused = self.store.hybrid_ranking(&query).await?;
                fusion::sort_ranked(&mut fused);
                fused.truncate(req.top_k);
                fused
            }
        };

        Ok(ranked)
    }

    /// Run the search and return hydrated items in rank order.
    pub async fn search(&self, req: &SearchRequest) -> Result<Vec<ScoredItem>> {
        let ranked = self.rank(req).await?;
        tracing::debug!(
            has_text = req.text().is_some(),
            has_vector = req.vector().is_some(),
            filters = req.filters.len(),
            hits = ranked.len(),
            "ranked catalog items"
        );
        if ranked.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = ranked.iter().map(|r| r.item_id).collect();
        let mut by_id: HashMap<i64, _> = self
            .store
            .fetch_items(&ids)
            .await?
            .into_iter()
            .map(|item| (item.id, item))
            .collect();

        Ok(ranked
            .iter()
            .filter_map(|r| {
                by_id.remove(&r.item_id).map(|item| ScoredItem {
                    item,
                    score: r.fused_score,
                })
            })
            .collect())
    }
}
