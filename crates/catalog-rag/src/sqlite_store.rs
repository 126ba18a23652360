//! SQLite-backed [`CatalogStore`].
//!
//! Keyword ranking uses the `items_fts` FTS5 index ordered by `bm25`.
//! Vector ranking is brute-force cosine over the embedding BLOBs, which is
//! adequate for catalogs of a few thousand items. Fusion uses the trait's
//! client-side default.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};
use sqlx::{Row, SqlitePool};

use catalog_rag_core::error::StoreError;
use catalog_rag_core::filter::{FilterValue, SearchFilter};
use catalog_rag_core::models::Item;
use catalog_rag_core::store::CatalogStore;
use catalog_rag_core::vector::{blob_to_vec, cosine_similarity, vec_to_blob};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Items the embedding job should process: those without a vector, or
    /// every item when `all` is set.
    pub async fn items_for_embedding(&self, all: bool) -> Result<Vec<Item>> {
        let sql = if all {
            "SELECT id, type, brand, name, description, price, embedding FROM items ORDER BY id"
        } else {
            "SELECT id, type, brand, name, description, price, embedding FROM items WHERE embedding IS NULL ORDER BY id"
        };
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_item).collect())
    }

    pub async fn set_embedding(&self, id: i64, embedding: &[f32]) -> Result<()> {
        sqlx::query("UPDATE items SET embedding = ? WHERE id = ?")
            .bind(vec_to_blob(embedding))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// `AND col op ?` for each filter. Columns and operators come from closed
/// enums; values are bound by [`bind_filters`].
fn filter_clause(filters: &[SearchFilter], table: &str) -> String {
    filters
        .iter()
        .map(|f| {
            format!(
                " AND {}.{} {} ?",
                table,
                f.column.as_sql(),
                f.operator.as_sql()
            )
        })
        .collect()
}

fn bind_filters<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    filters: &'q [SearchFilter],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for f in filters {
        query = match &f.value {
            FilterValue::Integer(v) => query.bind(*v),
            FilterValue::Number(v) => query.bind(*v),
            FilterValue::Text(v) => query.bind(v.as_str()),
        };
    }
    query
}

/// Turn free text into an FTS5 expression: each term quoted, OR-ed.
///
/// Quoting keeps FTS operators and punctuation in user text from being
/// parsed as query syntax.
pub fn fts_query(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t.to_lowercase()))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

fn row_to_item(row: &SqliteRow) -> Item {
    let embedding: Option<Vec<u8>> = row.get("embedding");
    Item {
        id: row.get("id"),
        item_type: row.get("type"),
        brand: row.get("brand"),
        name: row.get("name"),
        description: row.get("description"),
        price: row.get("price"),
        embedding: embedding.map(|b| blob_to_vec(&b)),
    }
}

fn query_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(e.to_string())
        }
        other => StoreError::Query(other.to_string()),
    }
}

#[async_trait]
impl CatalogStore for SqliteStore {
    async fn vector_ranking(
        &self,
        query_vector: &[f32],
        limit: usize,
        filters: &[SearchFilter],
    ) -> Result<Vec<i64>, StoreError> {
        let sql = format!(
            "SELECT id, embedding FROM items WHERE embedding IS NOT NULL{}",
            filter_clause(filters, "items")
        );
        let rows = bind_filters(sqlx::query(&sql), filters)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;

        let mut scored: Vec<(i64, f32)> = rows
            .iter()
            .map(|row| {
                let id: i64 = row.get("id");
                let blob: Vec<u8> = row.get("embedding");
                (id, cosine_similarity(query_vector, &blob_to_vec(&blob)))
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(limit);
        Ok(scored.into_iter().map(|(id, _)| id).collect())
    }

    async fn keyword_ranking(
        &self,
        query_text: &str,
        limit: usize,
        filters: &[SearchFilter],
    ) -> Result<Vec<i64>, StoreError> {
        let Some(fts) = fts_query(query_text) else {
            return Ok(Vec::new());
        };

        let sql = format!(
            r#"
            SELECT items.id AS id
            FROM items_fts
            JOIN items ON items.id = items_fts.rowid
            WHERE items_fts MATCH ?{}
            ORDER BY bm25(items_fts) ASC, items.id ASC
            LIMIT ?
            "#,
            filter_clause(filters, "items")
        );
        let query = bind_filters(sqlx::query(&sql).bind(fts), filters).bind(limit as i64);
        let rows = query.fetch_all(&self.pool).await.map_err(query_error)?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    async fn fetch_items(&self, ids: &[i64]) -> Result<Vec<Item>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT id, type, brand, name, description, price, embedding FROM items WHERE id IN ({})",
            placeholders
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(*id);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(query_error)?;
        Ok(rows.iter().map(row_to_item).collect())
    }
}
