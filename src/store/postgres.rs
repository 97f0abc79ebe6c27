// src/store/postgres.rs
//! Postgres-backed store. Expects the tables in `sql/schema.sql` to exist.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use super::{InsertOutcome, Store, StoreError};
use crate::model::{EnrichmentResult, NewSourceItem, SourceItem, SourceType};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and verify the pool with a round trip. Failing here is fatal
    /// for the process: no loop is started against a broken store.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let store = Self { pool };
        store.ping().await?;
        Ok(store)
    }
}

fn query_err(e: sqlx::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

fn decode_item(row: &PgRow) -> Result<SourceItem, StoreError> {
    let dec = |e: sqlx::Error| StoreError::Decode(e.to_string());
    let source_type: String = row.try_get("source_type").map_err(dec)?;
    let metadata: Option<Value> = row.try_get("meta_data").map_err(dec)?;
    let metadata = match metadata {
        Some(Value::Object(m)) => m,
        _ => Map::new(),
    };
    Ok(SourceItem {
        id: row.try_get("id").map_err(dec)?,
        source_type: source_type.parse().map_err(StoreError::Decode)?,
        source_identifier: row.try_get("source_identifier").map_err(dec)?,
        content: row.try_get("content").map_err(dec)?,
        published_at: row
            .try_get::<Option<DateTime<Utc>>, _>("published_at")
            .map_err(dec)?,
        fetched_at: row.try_get("fetched_at").map_err(dec)?,
        metadata,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn exists(&self, source_type: SourceType, identifier: &str) -> Result<bool, StoreError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM text_sources \
             WHERE source_type = $1 AND source_identifier = $2)",
        )
        .bind(source_type.as_str())
        .bind(identifier)
        .fetch_one(&self.pool)
        .await
        .map_err(query_err)
    }

    async fn insert_item(&self, item: &NewSourceItem) -> Result<InsertOutcome, StoreError> {
        let done = sqlx::query(
            "INSERT INTO text_sources \
               (source_type, source_identifier, content, published_at, fetched_at, meta_data) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (source_type, source_identifier) DO NOTHING",
        )
        .bind(item.source_type.as_str())
        .bind(&item.source_identifier)
        .bind(&item.content)
        .bind(item.published_at)
        .bind(item.fetched_at)
        .bind(Value::Object(item.metadata.clone()))
        .execute(&self.pool)
        .await
        .map_err(query_err)?;

        Ok(if done.rows_affected() == 0 {
            InsertOutcome::AlreadyPresent
        } else {
            InsertOutcome::Inserted
        })
    }

    async fn pending_enrichment(
        &self,
        analysis_type: &str,
        source_types: &[SourceType],
        limit: usize,
    ) -> Result<Vec<SourceItem>, StoreError> {
        let types: Vec<&str> = source_types.iter().map(|t| t.as_str()).collect();
        let rows = sqlx::query(
            "SELECT ts.id, ts.source_type, ts.source_identifier, ts.content, \
                    ts.published_at, ts.fetched_at, ts.meta_data \
             FROM text_sources ts \
             WHERE ts.source_type = ANY($2) \
               AND NOT EXISTS ( \
                 SELECT 1 FROM llm_analysis_results lar \
                 WHERE lar.text_source_id = ts.id AND lar.analysis_type = $1) \
             ORDER BY ts.id \
             LIMIT $3",
        )
        .bind(analysis_type)
        .bind(&types)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(query_err)?;

        rows.iter().map(decode_item).collect()
    }

    async fn insert_result(&self, result: &EnrichmentResult) -> Result<InsertOutcome, StoreError> {
        let done = sqlx::query(
            "INSERT INTO llm_analysis_results \
               (text_source_id, llm_provider, model_name, analysis_type, result, analyzed_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (text_source_id, analysis_type) DO NOTHING",
        )
        .bind(result.source_item_id)
        .bind(&result.provider)
        .bind(result.model.as_deref())
        .bind(&result.analysis_type)
        .bind(&result.payload)
        .bind(result.analyzed_at)
        .execute(&self.pool)
        .await
        .map_err(query_err)?;

        Ok(if done.rows_affected() == 0 {
            InsertOutcome::AlreadyPresent
        } else {
            InsertOutcome::Inserted
        })
    }

    async fn tracked_tickers(&self) -> Result<Vec<String>, StoreError> {
        sqlx::query_scalar::<_, String>("SELECT ticker FROM stocks ORDER BY ticker")
            .fetch_all(&self.pool)
            .await
            .map_err(query_err)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
