//! # Catalog RAG Core
//!
//! Retrieval-augmented chat over a product catalog: data model, filter
//! allow-list, reciprocal rank fusion, hybrid search, query rewriting,
//! token budgeting, the streaming adapter and the conversation
//! orchestrator.
//!
//! This crate contains no tokio, sqlx or HTTP. Storage and model access
//! come in through the [`store::CatalogStore`],
//! [`provider::EmbeddingProvider`] and [`provider::CompletionProvider`]
//! traits, implemented by the application crate.

pub mod chat;
pub mod error;
pub mod filter;
pub mod fusion;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod provider;
pub mod rewrite;
pub mod search;
pub mod store;
pub mod stream;
pub mod tokens;
pub mod vector;

#[cfg(test)]
mod testing;

pub use error::{RagError, Result};
