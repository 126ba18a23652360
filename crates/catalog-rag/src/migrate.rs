use anyhow::{Context, Result};
use sqlx::{PgPool, SqlitePool};

use crate::config::Config;
use crate::db::{self, Catalog};

/// Vector width used for the PostgreSQL column when embeddings are disabled.
pub const DEFAULT_VECTOR_DIMS: usize = 1536;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let catalog = db::connect(config).await?;
    let dims = config.embedding.dims.unwrap_or(DEFAULT_VECTOR_DIMS);

    match &catalog {
        Catalog::Sqlite(pool) => migrate_sqlite(pool).await?,
        Catalog::Postgres(pool) => migrate_postgres(pool, dims).await?,
    }

    catalog.close().await;
    Ok(())
}

pub async fn migrate_sqlite(pool: &SqlitePool) -> Result<()> {
    // Embeddings are little-endian f32 BLOBs.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            id INTEGER PRIMARY KEY,
            type TEXT NOT NULL,
            brand TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT NOT NULL,
            price REAL NOT NULL,
            embedding BLOB
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='items_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE items_fts USING fts5(
                name,
                description,
                content='items',
                content_rowid='id'
            )
            "#,
        )
        .execute(pool)
        .await?;

        // Index rows inserted before the FTS table existed.
        sqlx::query("INSERT INTO items_fts(items_fts) VALUES('rebuild')")
            .execute(pool)
            .await?;
    }

    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS items_fts_insert AFTER INSERT ON items BEGIN
            INSERT INTO items_fts(rowid, name, description)
            VALUES (new.id, new.name, new.description);
        END
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS items_fts_delete AFTER DELETE ON items BEGIN
            INSERT INTO items_fts(items_fts, rowid, name, description)
            VALUES ('delete', old.id, old.name, old.description);
        END
        "#,
    )
    .execute(pool)
    .await?;

    // Only text changes touch the index; embedding updates do not.
    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS items_fts_update AFTER UPDATE OF name, description ON items BEGIN
            INSERT INTO items_fts(items_fts, rowid, name, description)
            VALUES ('delete', old.id, old.name, old.description);
            INSERT INTO items_fts(rowid, name, description)
            VALUES (new.id, new.name, new.description);
        END
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_price ON items(price)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_brand ON items(brand)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn migrate_postgres(pool: &PgPool, dims: usize) -> Result<()> {
    sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
        .execute(pool)
        .await
        .context("Failed to enable the pgvector extension")?;

    // DDL cannot take bind parameters; dims comes from validated config.
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            id BIGINT PRIMARY KEY,
            type TEXT NOT NULL,
            brand TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT NOT NULL,
            price DOUBLE PRECISION NOT NULL,
            embedding vector({})
        )
        "#,
        dims
    ))
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_items_fts ON items
        USING GIN (to_tsvector('english', name || ' ' || description))
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_items_embedding ON items
        USING hnsw (embedding vector_cosine_ops)
        WITH (m = 16, ef_construction = 64)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_price ON items(price)")
        .execute(pool)
        .await?;

    Ok(())
}
