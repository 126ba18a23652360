//! Reciprocal Rank Fusion.
//!
//! Each sub-ranking contributes `1 / (k + rank)` for the items it contains,
//! with ranks starting at 1. An item missing from a sub-ranking gets nothing
//! from it, so presence in both lists always beats presence in one at the
//! same rank. Ties are broken by the lower item id.

use std::collections::HashMap;

use crate::models::RankedResult;

/// Smoothing constant `k` from the original RRF paper.
pub const DEFAULT_RRF_K: u32 = 60;

/// Score contributed by a single 1-based rank.
pub fn rrf_term(k: u32, rank: usize) -> f64 {
    1.0 / (f64::from(k) + rank as f64)
}

/// Fuse two id rankings (best first) into at most `top_k` results.
pub fn fuse(vector_ids: &[i64], keyword_ids: &[i64], k: u32, top_k: usize) -> Vec<RankedResult> {
    let mut scores: HashMap<i64, f64> = HashMap::new();
    for ranking in [vector_ids, keyword_ids] {
        for (idx, id) in ranking.iter().enumerate() {
            *scores.entry(*id).or_insert(0.0) += rrf_term(k, idx + 1);
        }
    }

    let mut fused: Vec<RankedResult> = scores
        .into_iter()
        .map(|(item_id, fused_score)| RankedResult {
            item_id,
            fused_score,
        })
        .collect();
    sort_ranked(&mut fused);
    fused.truncate(top_k);
    fused
}

/// Turn a single sub-ranking into results without fusing.
///
/// Scores are that ranking's own RRF terms; nothing is added for the
/// absent branch.
pub fn single(ids: &[i64], k: u32, top_k: usize) -> Vec<RankedResult> {
    ids.iter()
        .take(top_k)
        .enumerate()
        .map(|(idx, id)| RankedResult {
            item_id: *id,
            fused_score: rrf_term(k, idx + 1),
        })
        .collect()
}

/// Sort by score descending, then id ascending.
pub fn sort_ranked(results: &mut [RankedResult]) {
    results.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.item_id.cmp(&b.item_id))
    });
}
