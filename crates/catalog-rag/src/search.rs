//! `crag search`: run the hybrid search engine and print ranked items.

use anyhow::{bail, Result};

use catalog_rag_core::filter::SearchFilter;
use catalog_rag_core::models::{RetrievalMode, ScoredItem};
use catalog_rag_core::provider::embed_query_checked;
use catalog_rag_core::search::{HybridSearch, SearchRequest};

use crate::config::Config;
use crate::context::search_settings;
use crate::db;
use crate::embedding::create_embedder;

pub async fn run_search(
    config: &Config,
    query: &str,
    mode: RetrievalMode,
    top: Option<usize>,
    filters: &[String],
) -> Result<()> {
    let filters = filters
        .iter()
        .map(|f| f.parse::<SearchFilter>())
        .collect::<Result<Vec<_>, _>>()?;

    let embedder = create_embedder(&config.embedding)?;
    if mode.has_vector() && embedder.is_none() {
        bail!(
            "Search mode '{}' requires embeddings. Set [embedding] provider in config or use --mode text.",
            mode.as_str()
        );
    }

    let query_vector = match (&embedder, mode.has_vector()) {
        (Some(embedder), true) => Some(embed_query_checked(embedder.as_ref(), query).await?),
        _ => None,
    };

    let catalog = db::connect(config).await?;
    let engine = HybridSearch::new(catalog.store(), search_settings(config));

    let request = SearchRequest {
        query_text: mode.has_text().then(|| query.to_string()),
        query_vector,
        top_k: top.unwrap_or(config.retrieval.top),
        filters,
    };
    let results = engine.search(&request).await;
    catalog.close().await;
    let results = results?;

    print_results(&results);
    Ok(())
}

fn print_results(results: &[ScoredItem]) {
    if results.is_empty() {
        println!("No results.");
        return;
    }
    for (i, result) in results.iter().enumerate() {
        let item = &result.item;
        println!(
            "{}. [{:.4}] {} / {} ({})",
            i + 1,
            result.score,
            item.brand,
            item.name,
            item.item_type
        );
        println!("    price: ${:.2}", item.price);
        println!(
            "    description: \"{}\"",
            item.description.replace('\n', " ").trim()
        );
        println!("    id: {}", item.id);
        println!();
    }
}
