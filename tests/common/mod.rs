// tests/common/mod.rs
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use stock_insights_pipeline::enrich::Analyzer;
use stock_insights_pipeline::fetch::FetchError;
use stock_insights_pipeline::ingest::types::{Candidate, SourceProvider};
use stock_insights_pipeline::{NewSourceItem, SourceType};
use tokio::time::Instant;

pub fn feed_item(id: &str, text: &str) -> NewSourceItem {
    NewSourceItem {
        source_type: SourceType::Feed,
        source_identifier: id.to_string(),
        content: text.to_string(),
        published_at: None,
        fetched_at: Utc::now(),
        metadata: Map::new(),
    }
}

/// Provider that replays scripted outcomes, then repeats `fallback`.
pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<Result<Vec<NewSourceItem>, FetchError>>>,
    fallback: Vec<NewSourceItem>,
    pub calls: Mutex<Vec<Instant>>,
}

impl ScriptedProvider {
    pub fn steady(name: &str, items: Vec<NewSourceItem>) -> Arc<Self> {
        Self::scripted(name, vec![], items)
    }

    pub fn scripted(
        name: &str,
        script: Vec<Result<Vec<NewSourceItem>, FetchError>>,
        fallback: Vec<NewSourceItem>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(script.into()),
            fallback,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceProvider for ScriptedProvider {
    async fn fetch_latest(&self) -> Result<Vec<Candidate>, FetchError> {
        self.calls.lock().unwrap().push(Instant::now());
        let next = self.script.lock().unwrap().pop_front();
        let items = match next {
            Some(outcome) => outcome?,
            None => self.fallback.clone(),
        };
        Ok(items.into_iter().map(Ok).collect())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Analyzer that replays scripted outcomes, then answers "neutral".
pub struct ScriptedAnalyzer {
    script: Mutex<VecDeque<Result<Value, FetchError>>>,
    pub calls: Mutex<Vec<(Instant, String)>>,
}

impl ScriptedAnalyzer {
    pub fn new(script: Vec<Result<Value, FetchError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Analyzer for ScriptedAnalyzer {
    async fn analyze(&self, text: &str) -> Result<Value, FetchError> {
        self.calls
            .lock()
            .unwrap()
            .push((Instant::now(), text.to_string()));
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(json!({ "label": "neutral", "score": 0.0 })))
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_name(&self) -> Option<&str> {
        Some("scripted-v1")
    }
}
