//! `crag embed`: compute item embeddings offline.
//!
//! Embedding text is [`Item::to_str_for_embedding`]. A failed batch is
//! reported and skipped; the next run picks its items up again.

use anyhow::{bail, Result};

use catalog_rag_core::models::Item;
use catalog_rag_core::provider::EmbeddingProvider;

use crate::config::Config;
use crate::db;
use crate::embedding::OpenAiEmbedder;

#[derive(Debug, Default, PartialEq)]
pub struct EmbedStats {
    pub total: usize,
    pub embedded: usize,
    pub failed: usize,
}

pub async fn run_embed(
    config: &Config,
    all: bool,
    batch_size_override: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let catalog = db::connect(config).await?;
    let items = catalog.items_for_embedding(all).await?;

    if dry_run {
        println!("embed (dry-run)");
        println!("  items needing embeddings: {}", items.len());
        catalog.close().await;
        return Ok(());
    }

    if items.is_empty() {
        println!("embed");
        println!("  all items up to date");
        catalog.close().await;
        return Ok(());
    }

    let provider = OpenAiEmbedder::new(&config.embedding)?;
    let batch_size = batch_size_override
        .unwrap_or(config.embedding.batch_size)
        .max(1);
    let stats = embed_items(&provider, &items, batch_size, |id, vector| {
        let catalog = catalog.clone();
        async move { catalog.set_embedding(id, &vector).await }
    })
    .await?;

    println!("embed");
    println!("  model: {}", provider.model_name());
    println!("  total: {}", stats.total);
    println!("  embedded: {}", stats.embedded);
    println!("  failed: {}", stats.failed);

    catalog.close().await;
    Ok(())
}

/// Embed `items` in batches, handing each vector to `write`.
///
/// Provider failures and wrong-width vectors fail only their batch;
/// write failures abort.
pub async fn embed_items<W, F>(
    provider: &dyn EmbeddingProvider,
    items: &[Item],
    batch_size: usize,
    mut write: W,
) -> Result<EmbedStats>
where
    W: FnMut(i64, Vec<f32>) -> F,
    F: std::future::Future<Output = Result<()>>,
{
    let mut stats = EmbedStats {
        total: items.len(),
        ..EmbedStats::default()
    };

    for batch in items.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(Item::to_str_for_embedding).collect();

        let vectors = match provider.embed(&texts).await {
            Ok(v) => v,
            Err(e) => {
                eprintln!("Warning: embedding batch failed: {}", e);
                stats.failed += batch.len();
                continue;
            }
        };

        if let Some(bad) = vectors.iter().find(|v| v.len() != provider.dims()) {
            eprintln!(
                "Warning: embedding batch skipped: expected {} dimensions, got {}",
                provider.dims(),
                bad.len()
            );
            stats.failed += batch.len();
            continue;
        }

        for (item, vector) in batch.iter().zip(vectors) {
            write(item.id, vector).await?;
            stats.embedded += 1;
        }
        tracing::debug!(
            embedded = stats.embedded,
            total = stats.total,
            "embedded batch"
        );
    }

    Ok(stats)
}
