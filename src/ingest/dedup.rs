// src/ingest/dedup.rs
use std::sync::Arc;

use crate::model::{NewSourceItem, SourceType};
use crate::store::{InsertOutcome, Store, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Persisted by this call.
    New,
    /// Already known, either from the lookup or from a racing insert.
    Seen,
}

/// Natural-key index over persisted items.
#[derive(Clone)]
pub struct DedupIndex {
    store: Arc<dyn Store>,
}

impl DedupIndex {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn exists(&self, source_type: SourceType, identifier: &str) -> Result<bool, StoreError> {
        self.store.exists(source_type, identifier).await
    }

    /// Check, then insert. The store's own uniqueness rule absorbs a racing
    /// duplicate, so the second writer also sees `Seen`.
    pub async fn admit(&self, item: &NewSourceItem) -> Result<Admission, StoreError> {
        let (source_type, identifier) = item.dedup_key();
        if self.exists(source_type, identifier).await? {
            return Ok(Admission::Seen);
        }
        Ok(match self.store.insert_item(item).await? {
            InsertOutcome::Inserted => Admission::New,
            InsertOutcome::AlreadyPresent => Admission::Seen,
        })
    }
}
