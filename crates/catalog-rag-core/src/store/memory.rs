//! In-memory [`CatalogStore`], used by the search and pipeline tests.
//!
//! Vector ranking is brute-force cosine distance. Keyword ranking counts
//! distinct query terms found in the name and description, which is
//! crude but deterministic.

use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::filter::SearchFilter;
use crate::models::Item;
use crate::vector::cosine_similarity;

use super::CatalogStore;

/// Catalog held in a `Vec` behind a lock.
pub struct InMemoryStore {
    items: RwLock<Vec<Item>>,
}

impl InMemoryStore {
    pub fn with_items(items: Vec<Item>) -> Self {
        Self {
            items: RwLock::new(items),
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<Item>>, StoreError> {
        self.items
            .read()
            .map_err(|_| StoreError::Unavailable("item lock poisoned".into()))
    }
}

fn passes(item: &Item, filters: &[SearchFilter]) -> bool {
    filters.iter().all(|f| f.matches(item))
}

/// Sort `(id, score)` pairs by score descending, id ascending.
fn ranked_ids(mut scored: Vec<(i64, f64)>, limit: usize) -> Vec<i64> {
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    scored.into_iter().take(limit).map(|(id, _)| id).collect()
}

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn vector_ranking(
        &self,
        query_vector: &[f32],
        limit: usize,
        filters: &[SearchFilter],
    ) -> Result<Vec<i64>, StoreError> {
        let items = self.read()?;
        let scored = items
            .iter()
            .filter(|i| passes(i, filters))
            .filter_map(|i| {
                i.embedding
                    .as_deref()
                    .map(|e| (i.id, f64::from(cosine_similarity(query_vector, e))))
            })
            .collect();
        Ok(ranked_ids(scored, limit))
    }

    async fn keyword_ranking(
        &self,
        query_text: &str,
        limit: usize,
        filters: &[SearchFilter],
    ) -> Result<Vec<i64>, StoreError> {
        let query_lower = query_text.to_lowercase();
        let terms: Vec<&str> = query_lower.split_whitespace().collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let items = self.read()?;
        let scored = items
            .iter()
            .filter(|i| passes(i, filters))
            .filter_map(|i| {
                let haystack = format!("{} {}", i.name, i.description).to_lowercase();
                let matches = terms.iter().filter(|t| haystack.contains(*t)).count();
                (matches > 0).then_some((i.id, matches as f64))
            })
            .collect();
        Ok(ranked_ids(scored, limit))
    }

    async fn fetch_items(&self, ids: &[i64]) -> Result<Vec<Item>, StoreError> {
        let items = self.read()?;
        Ok(items
            .iter()
            .filter(|i| ids.contains(&i.id))
            .cloned()
            .collect())
    }
}
