// src/store/mod.rs
//! Storage seam. Both loops talk to persisted state only through [`Store`].

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{EnrichmentResult, NewSourceItem, SourceItem, SourceType};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to connect to storage: {0}")]
    Connection(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored row could not be decoded: {0}")]
    Decode(String),
}

/// Result of an insert-if-absent. A uniqueness conflict is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyPresent,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Dedup lookup on `(source_type, source_identifier)`.
    async fn exists(&self, source_type: SourceType, identifier: &str) -> Result<bool, StoreError>;

    /// Insert unless the dedup key already exists.
    async fn insert_item(&self, item: &NewSourceItem) -> Result<InsertOutcome, StoreError>;

    /// Oldest items of `source_types` that have no result for `analysis_type`.
    async fn pending_enrichment(
        &self,
        analysis_type: &str,
        source_types: &[SourceType],
        limit: usize,
    ) -> Result<Vec<SourceItem>, StoreError>;

    /// Insert unless a result for `(source_item_id, analysis_type)` exists.
    async fn insert_result(&self, result: &EnrichmentResult) -> Result<InsertOutcome, StoreError>;

    /// Tickers registered in the `stocks` table.
    async fn tracked_tickers(&self) -> Result<Vec<String>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Release connections. Called once, after every loop has stopped.
    async fn close(&self) {}
}
