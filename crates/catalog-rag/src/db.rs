use anyhow::Result;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use catalog_rag_core::models::Item;
use catalog_rag_core::store::CatalogStore;

use crate::config::Config;
use crate::pg_store::PgStore;
use crate::sqlite_store::SqliteStore;

/// Connection pool for whichever backend `db.url` names.
#[derive(Clone)]
pub enum Catalog {
    Sqlite(SqlitePool),
    Postgres(PgPool),
}

pub async fn connect(config: &Config) -> Result<Catalog> {
    let url = config.db.url.as_str();

    if url.starts_with("sqlite:") {
        // Ensure parent directory exists
        let path = url
            .trim_start_matches("sqlite:")
            .trim_start_matches("//")
            .split('?')
            .next()
            .unwrap_or_default();
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.db.max_connections)
            .connect_with(options)
            .await?;
        return Ok(Catalog::Sqlite(pool));
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.db.max_connections)
        .connect(url)
        .await?;
    Ok(Catalog::Postgres(pool))
}

impl Catalog {
    /// Read interface used by search and chat.
    pub fn store(&self) -> Arc<dyn CatalogStore> {
        match self {
            Catalog::Sqlite(pool) => Arc::new(SqliteStore::new(pool.clone())),
            Catalog::Postgres(pool) => Arc::new(PgStore::new(pool.clone())),
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            Catalog::Sqlite(_) => "sqlite",
            Catalog::Postgres(_) => "postgres",
        }
    }

    pub async fn close(&self) {
        match self {
            Catalog::Sqlite(pool) => pool.close().await,
            Catalog::Postgres(pool) => pool.close().await,
        }
    }

    /// Items the embedding job should process.
    pub async fn items_for_embedding(&self, all: bool) -> Result<Vec<Item>> {
        match self {
            Catalog::Sqlite(pool) => {
                SqliteStore::new(pool.clone())
                    .items_for_embedding(all)
                    .await
            }
            Catalog::Postgres(pool) => PgStore::new(pool.clone()).items_for_embedding(all).await,
        }
    }

    pub async fn set_embedding(&self, id: i64, embedding: &[f32]) -> Result<()> {
        match self {
            Catalog::Sqlite(pool) => {
                SqliteStore::new(pool.clone())
                    .set_embedding(id, embedding)
                    .await
            }
            Catalog::Postgres(pool) => {
                PgStore::new(pool.clone())
                    .set_embedding(id, embedding)
                    .await
            }
        }
    }
}
