// src/store/memory.rs
//! In-process store with the same uniqueness rules as the Postgres schema.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{InsertOutcome, Store, StoreError};
use crate::model::{EnrichmentResult, NewSourceItem, SourceItem, SourceType};

#[derive(Debug, Default)]
struct Inner {
    items: Vec<SourceItem>,
    index: HashMap<(SourceType, String), i64>,
    results: Vec<EnrichmentResult>,
    result_keys: HashSet<(i64, String)>,
    tickers: Vec<String>,
    next_id: i64,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tickers<I, S>(tickers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        store.set_tickers(tickers);
        store
    }

    pub fn set_tickers<I, S>(&self, tickers: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut g = self.inner.lock().expect("memory store poisoned");
        g.tickers = tickers.into_iter().map(Into::into).collect();
    }

    pub fn items(&self) -> Vec<SourceItem> {
        self.inner.lock().expect("memory store poisoned").items.clone()
    }

    pub fn results(&self) -> Vec<EnrichmentResult> {
        self.inner.lock().expect("memory store poisoned").results.clone()
    }

    pub fn item_count(&self) -> usize {
        self.inner.lock().expect("memory store poisoned").items.len()
    }

    pub fn result_count(&self) -> usize {
        self.inner.lock().expect("memory store poisoned").results.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn exists(&self, source_type: SourceType, identifier: &str) -> Result<bool, StoreError> {
        let g = self.inner.lock().expect("memory store poisoned");
        Ok(g.index.contains_key(&(source_type, identifier.to_string())))
    }

    async fn insert_item(&self, item: &NewSourceItem) -> Result<InsertOutcome, StoreError> {
        let mut g = self.inner.lock().expect("memory store poisoned");
        let key = (item.source_type, item.source_identifier.clone());
        if g.index.contains_key(&key) {
            return Ok(InsertOutcome::AlreadyPresent);
        }
        g.next_id += 1;
        let id = g.next_id;
        g.index.insert(key, id);
        g.items.push(SourceItem::from_new(id, item.clone()));
        Ok(InsertOutcome::Inserted)
    }

    async fn pending_enrichment(
        &self,
        analysis_type: &str,
        source_types: &[SourceType],
        limit: usize,
    ) -> Result<Vec<SourceItem>, StoreError> {
        let g = self.inner.lock().expect("memory store poisoned");
        let out = g
            .items
            .iter()
            .filter(|it| source_types.contains(&it.source_type))
            .filter(|it| {
                !g.result_keys
                    .contains(&(it.id, analysis_type.to_string()))
            })
            .take(limit)
            .cloned()
            .collect();
        Ok(out)
    }

    async fn insert_result(&self, result: &EnrichmentResult) -> Result<InsertOutcome, StoreError> {
        let mut g = self.inner.lock().expect("memory store poisoned");
        let key = (result.source_item_id, result.analysis_type.clone());
        if !g.result_keys.insert(key) {
            return Ok(InsertOutcome::AlreadyPresent);
        }
        g.results.push(result.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn tracked_tickers(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.inner.lock().expect("memory store poisoned").tickers.clone())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::{json, Map};

    fn item(id: &str) -> NewSourceItem {
        NewSourceItem {
            source_type: SourceType::Feed,
            source_identifier: id.to_string(),
            content: format!("body of {id}"),
            published_at: None,
            fetched_at: Utc::now(),
            metadata: Map::new(),
        }
    }

    fn result(source_item_id: i64) -> EnrichmentResult {
        EnrichmentResult {
            source_item_id,
            analysis_type: "sentiment".into(),
            provider: "test".into(),
            model: None,
            payload: json!({"score": 0.1}),
            analyzed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn duplicate_item_is_absorbed() {
        let s = MemoryStore::new();
        assert_eq!(s.insert_item(&item("a")).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(
            s.insert_item(&item("a")).await.unwrap(),
            InsertOutcome::AlreadyPresent
        );
        assert_eq!(s.item_count(), 1);
        assert!(s.exists(SourceType::Feed, "a").await.unwrap());
        assert!(!s.exists(SourceType::MarketBar, "a").await.unwrap());
    }

    #[tokio::test]
    async fn pending_excludes_enriched_and_respects_limit() {
        let s = MemoryStore::new();
        for id in ["a", "b", "c"] {
            s.insert_item(&item(id)).await.unwrap();
        }
        s.insert_result(&result(1)).await.unwrap();

        let pending = s
            .pending_enrichment("sentiment", &[SourceType::Feed], 5)
            .await
            .unwrap();
        let ids: Vec<i64> = pending.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![2, 3]);

        let one = s
            .pending_enrichment("sentiment", &[SourceType::Feed], 1)
            .await
            .unwrap();
        assert_eq!(one.len(), 1);

        // Other analysis types are independent.
        let other = s
            .pending_enrichment("topics", &[SourceType::Feed], 5)
            .await
            .unwrap();
        assert_eq!(other.len(), 3);
    }

    #[tokio::test]
    async fn second_result_for_same_key_is_absorbed() {
        let s = MemoryStore::new();
        s.insert_item(&item("a")).await.unwrap();
        assert_eq!(s.insert_result(&result(1)).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(
            s.insert_result(&result(1)).await.unwrap(),
            InsertOutcome::AlreadyPresent
        );
        assert_eq!(s.result_count(), 1);
    }
}
