//! # Catalog RAG CLI (`crag`)
//!
//! ## Usage
//!
//! ```bash
//! crag --config ./config/crag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `crag init` | Create the schema (SQLite or Postgres) |
//! | `crag search "<query>"` | Run hybrid, text, or vector search |
//! | `crag chat "<question>"` | Answer one question from the catalog |
//! | `crag embed` | Embed items that have no vector yet |
//! | `crag serve` | Start the HTTP chat server |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use catalog_rag::{chat_cmd, config, embed_cmd, migrate, search, server};
use catalog_rag_core::models::RetrievalMode;

/// Catalog RAG: hybrid search and grounded chat over a product catalog.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/crag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "crag",
    about = "Catalog RAG: hybrid search and grounded chat over a product catalog",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/crag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Search the catalog.
    Search {
        /// The search query string.
        query: String,

        /// Retrieval mode: `text`, `vectors`, or `hybrid`.
        /// Vector modes require an embedding provider.
        #[arg(long, default_value = "hybrid")]
        mode: RetrievalMode,

        /// Maximum number of results to return.
        #[arg(long)]
        top: Option<usize>,

        /// Column filter, e.g. `--filter "price<50"` or `--filter brand=Daybird`.
        #[arg(long = "filter")]
        filters: Vec<String>,
    },

    /// Ask one question and print the grounded answer.
    Chat {
        /// The question.
        question: String,

        /// Print the answer as it is generated.
        #[arg(long)]
        stream: bool,

        /// Print sources and thought steps after the answer.
        #[arg(long)]
        thoughts: bool,

        /// Retrieval mode: `text`, `vectors`, or `hybrid`.
        #[arg(long, default_value = "hybrid")]
        mode: RetrievalMode,

        /// Number of sources to retrieve.
        #[arg(long)]
        top: Option<usize>,
    },

    /// Embed items that have no embedding yet.
    Embed {
        /// Re-embed every item, not just the missing ones.
        #[arg(long)]
        all: bool,

        /// Override the batch size from config (number of texts per API call).
        #[arg(long)]
        batch_size: Option<usize>,

        /// Show counts without performing any embedding.
        #[arg(long)]
        dry_run: bool,
    },

    /// Start the HTTP chat server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Search {
            query,
            mode,
            top,
            filters,
        } => {
            search::run_search(&cfg, &query, mode, top, &filters).await?;
        }
        Commands::Chat {
            question,
            stream,
            thoughts,
            mode,
            top,
        } => {
            let opts = chat_cmd::ChatOptions {
                stream,
                thoughts,
                mode,
                top,
            };
            chat_cmd::run_chat(&cfg, &question, opts).await?;
        }
        Commands::Embed {
            all,
            batch_size,
            dry_run,
        } => {
            embed_cmd::run_embed(&cfg, all, batch_size, dry_run).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
