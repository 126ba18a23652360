//! Catalog storage abstraction.
//!
//! The [`CatalogStore`] trait is the read interface the search engine
//! needs: two independent sub-rankings, optional server-side fusion, and
//! hydration of ranked ids back into items. Implementations exist for
//! SQLite and PostgreSQL in the application crate, and [`memory`] provides
//! an in-memory store for tests.
//!
//! Implementations must be `Send + Sync`; the store is shared read-only
//! across concurrent requests.

pub mod memory;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::filter::SearchFilter;
use crate::fusion;
use crate::models::{Item, RankedResult};

/// Inputs to a fused ranking.
#[derive(Debug, Clone, Copy)]
pub struct HybridQuery<'a> {
    pub query_text: &'a str,
    pub query_vector: &'a [f32],
    /// RRF smoothing constant.
    pub rrf_k: u32,
    /// Candidates kept from each sub-ranking (`N >= top_k`).
    pub candidate_k: usize,
    /// Final result cap.
    pub top_k: usize,
    pub filters: &'a [SearchFilter],
}

/// Read-only access to the catalog.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`vector_ranking`](CatalogStore::vector_ranking) | ids by ascending distance to a vector |
/// | [`keyword_ranking`](CatalogStore::keyword_ranking) | ids by descending full-text relevance |
/// | [`hybrid_ranking`](CatalogStore::hybrid_ranking) | RRF over both, client-side by default |
/// | [`fetch_items`](CatalogStore::fetch_items) | hydrate ids into items |
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Rank filtered items by ascending vector distance, best first.
    async fn vector_ranking(
        &self,
        query_vector: &[f32],
        limit: usize,
        filters: &[SearchFilter],
    ) -> Result<Vec<i64>, StoreError>;

    /// Rank filtered items by descending full-text relevance, best first.
    async fn keyword_ranking(
        &self,
        query_text: &str,
        limit: usize,
        filters: &[SearchFilter],
    ) -> Result<Vec<i64>, StoreError>;

    /// Fuse both sub-rankings with RRF.
    ///
    /// The default issues both sub-queries concurrently and fuses in
    /// process. Stores that can compute the fusion server-side in one
    /// statement override this.
    async fn hybrid_ranking(
        &self,
        query: &HybridQuery<'_>,
    ) -> Result<Vec<RankedResult>, StoreError> {
        let (vector_ids, keyword_ids) = futures::try_join!(
            self.vector_ranking(query.query_vector, query.candidate_k, query.filters),
            self.keyword_ranking(query.query_text, query.candidate_k, query.filters),
        )?;
        tracing::debug!(
            vector = vector_ids.len(),
            keyword = keyword_ids.len(),
            "fusing sub-rankings"
        );
        Ok(fusion::fuse(&vector_ids, &keyword_ids, query.rrf_k, query.top_k))
    }

    /// Load items by id. Order of the returned items is unspecified; ids
    /// that do not exist are skipped.
    async fn fetch_items(&self, ids: &[i64]) -> Result<Vec<Item>, StoreError>;
}
