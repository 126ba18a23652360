//! # Catalog RAG
//!
//! Retrieval-augmented product Q&A over a catalog database.
//!
//! A chat turn is rewritten into a search query by the chat model, run
//! through hybrid search (full-text + vector, fused with Reciprocal Rank
//! Fusion), and answered from the top items as cited sources. Answers are
//! returned whole or streamed as NDJSON.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌────────────────┐
//! │ CLI / HTTP   │──▶│  ChatPipeline    │──▶│ CatalogStore   │
//! │ (crag)       │   │  rewrite+search  │   │ SQLite | PG    │
//! └──────────────┘   └────────┬─────────┘   └────────────────┘
//!                             │
//!                             ▼
//!                   ┌──────────────────┐
//!                   │ OpenAI / Azure / │
//!                   │ Ollama providers │
//!                   └──────────────────┘
//! ```
//!
//! The retrieval and orchestration logic lives in `catalog-rag-core`.
//! This crate supplies the database stores, the HTTP providers, the CLI,
//! and the server.
//!
//! ## Quick Start
//!
//! ```bash
//! crag init                              # create schema
//! crag embed                             # embed items missing vectors
//! crag search "waterproof boots" --mode hybrid
//! crag chat "Do you have hiking boots under $100?"
//! crag serve                             # POST /chat
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection (SQLite or Postgres) |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | FTS5 + brute-force vector store |
//! | [`pg_store`] | Full-text + pgvector store with in-database RRF |
//! | [`openai`] | Host endpoints and auth |
//! | [`embedding`] | Embedding provider over HTTP |
//! | [`completion`] | Completion provider over HTTP (whole and SSE) |
//! | [`context`] | Wiring from config to the pipeline |
//! | [`search`] | `crag search` |
//! | [`chat_cmd`] | `crag chat` |
//! | [`embed_cmd`] | `crag embed` |
//! | [`server`] | HTTP chat server |

pub mod chat_cmd;
pub mod completion;
pub mod config;
pub mod context;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod migrate;
pub mod openai;
pub mod pg_store;
pub mod search;
pub mod server;
pub mod sqlite_store;
