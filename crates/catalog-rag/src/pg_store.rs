//! PostgreSQL + pgvector [`CatalogStore`].
//!
//! Hybrid retrieval is one statement: two ranked CTEs (cosine distance
//! via `<=>`, `ts_rank_cd` full-text rank) joined with a full outer join
//! and summed as `1/(k + rank)`. Every value is a bind parameter:
//!
//! | Param | Value |
//! |-------|-------|
//! | `$1` | query vector, as a pgvector literal |
//! | `$2` | query text |
//! | `$3` | RRF `k` |
//! | `$4` | final limit |
//! | `$5` | per-branch candidate limit |
//! | `$6..` | filter values, shared by both branches |

use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};

use catalog_rag_core::error::StoreError;
use catalog_rag_core::filter::{FilterValue, SearchFilter};
use catalog_rag_core::models::{Item, RankedResult};
use catalog_rag_core::store::{CatalogStore, HybridQuery};
use catalog_rag_core::vector::{parse_pgvector_literal, to_pgvector_literal};

const TSVECTOR: &str = "to_tsvector('english', name || ' ' || description)";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn items_for_embedding(&self, all: bool) -> Result<Vec<Item>> {
        let sql = if all {
            "SELECT id, type, brand, name, description, price, embedding::text AS embedding FROM items ORDER BY id"
        } else {
            "SELECT id, type, brand, name, description, price, embedding::text AS embedding FROM items WHERE embedding IS NULL ORDER BY id"
        };
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_item).collect())
    }

    pub async fn set_embedding(&self, id: i64, embedding: &[f32]) -> Result<()> {
        sqlx::query("UPDATE items SET embedding = $1::vector WHERE id = $2")
            .bind(to_pgvector_literal(embedding))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// `AND col op $n` for each filter, numbering from `first`.
fn filter_clause(filters: &[SearchFilter], first: usize) -> String {
    filters
        .iter()
        .enumerate()
        .map(|(i, f)| {
            format!(
                " AND {} {} ${}",
                f.column.as_sql(),
                f.operator.as_sql(),
                first + i
            )
        })
        .collect()
}

fn bind_filters<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    filters: &'q [SearchFilter],
) -> Query<'q, Postgres, PgArguments> {
    for f in filters {
        query = match &f.value {
            FilterValue::Integer(v) => query.bind(*v),
            FilterValue::Number(v) => query.bind(*v),
            FilterValue::Text(v) => query.bind(v.as_str()),
        };
    }
    query
}

fn row_to_item(row: &PgRow) -> Item {
    let embedding: Option<String> = row.get("embedding");
    Item {
        id: row.get("id"),
        item_type: row.get("type"),
        brand: row.get("brand"),
        name: row.get("name"),
        description: row.get("description"),
        price: row.get("price"),
        embedding: embedding.and_then(|e| parse_pgvector_literal(&e)),
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

/// The fused ranking statement for the given filters.
pub fn hybrid_sql(filters: &[SearchFilter]) -> String {
    let clause = filter_clause(filters, 6);
    format!(
        r#"
        WITH semantic AS (
            SELECT id, ROW_NUMBER() OVER (ORDER BY embedding <=> $1::vector, id) AS rank
            FROM items
            WHERE embedding IS NOT NULL{clause}
            ORDER BY embedding <=> $1::vector, id
            LIMIT $5
        ),
        keyword AS (
            SELECT id, ROW_NUMBER() OVER (ORDER BY ts_rank_cd({ts}, query) DESC, id) AS rank
            FROM items, plainto_tsquery('english', $2) query
            WHERE {ts} @@ query{clause}
            ORDER BY ts_rank_cd({ts}, query) DESC, id
            LIMIT $5
        )
        SELECT COALESCE(semantic.id, keyword.id) AS id,
               (COALESCE(1.0::float8 / ($3::float8 + semantic.rank), 0.0::float8)
              + COALESCE(1.0::float8 / ($3::float8 + keyword.rank), 0.0::float8)) AS score
        FROM semantic
        FULL OUTER JOIN keyword ON semantic.id = keyword.id
        ORDER BY score DESC, id ASC
        LIMIT $4
        "#,
        clause = clause,
        ts = TSVECTOR,
    )
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn vector_ranking(
        &self,
        query_vector: &[f32],
        limit: usize,
        filters: &[SearchFilter],
    ) -> Result<Vec<i64>, StoreError> {
        let sql = format!(
            "SELECT id FROM items WHERE embedding IS NOT NULL{} ORDER BY embedding <=> $1::vector, id LIMIT $2",
            filter_clause(filters, 3)
        );
        let query = sqlx::query(&sql)
            .bind(to_pgvector_literal(query_vector))
            .bind(limit as i64);
        let rows = bind_filters(query, filters)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    async fn keyword_ranking(
        &self,
        query_text: &str,
        limit: usize,
        filters: &[SearchFilter],
    ) -> Result<Vec<i64>, StoreError> {
        let sql = format!(
            r#"
            SELECT id
            FROM items, plainto_tsquery('english', $1) query
            WHERE {ts} @@ query{clause}
            ORDER BY ts_rank_cd({ts}, query) DESC, id
            LIMIT $2
            "#,
            ts = TSVECTOR,
            clause = filter_clause(filters, 3)
        );
        let query = sqlx::query(&sql).bind(query_text).bind(limit as i64);
        let rows = bind_filters(query, filters)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    async fn hybrid_ranking(&self, q: &HybridQuery<'_>) -> Result<Vec<RankedResult>, StoreError> {
        let sql = hybrid_sql(q.filters);
        let query = sqlx::query(&sql)
            .bind(to_pgvector_literal(q.query_vector))
            .bind(q.query_text)
            .bind(q.rrf_k as i32)
            .bind(q.top_k as i64)
            .bind(q.candidate_k as i64);
        let rows = bind_filters(query, q.filters)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;
        Ok(rows
            .iter()
            .map(|r| RankedResult {
                item_id: r.get("id"),
                fused_score: r.get("score"),
            })
            .collect())
    }

    async fn fetch_items(&self, ids: &[i64]) -> Result<Vec<Item>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT id, type, brand, name, description, price, embedding::text AS embedding FROM items WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;
        Ok(rows.iter().map(row_to_item).collect())
    }
}
