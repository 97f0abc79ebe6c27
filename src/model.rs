// src/model.rs
//! Persisted records shared by the ingestion and enrichment loops.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of upstream a [`SourceItem`] came from. Half of the dedup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceType {
    #[serde(rename = "rss")]
    Feed,
    #[serde(rename = "market_bar")]
    MarketBar,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Feed => "rss",
            SourceType::MarketBar => "market_bar",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rss" | "feed" => Ok(SourceType::Feed),
            "market_bar" | "market-bar" | "bar" => Ok(SourceType::MarketBar),
            other => Err(format!("unknown source type: {other}")),
        }
    }
}

/// A candidate item produced by a provider, not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSourceItem {
    pub source_type: SourceType,
    pub source_identifier: String,
    pub content: String,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    pub metadata: Map<String, Value>,
}

impl NewSourceItem {
    pub fn dedup_key(&self) -> (SourceType, &str) {
        (self.source_type, self.source_identifier.as_str())
    }
}

/// A persisted item. `id` follows insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceItem {
    pub id: i64,
    pub source_type: SourceType,
    pub source_identifier: String,
    pub content: String,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    pub metadata: Map<String, Value>,
}

impl SourceItem {
    pub fn from_new(id: i64, item: NewSourceItem) -> Self {
        Self {
            id,
            source_type: item.source_type,
            source_identifier: item.source_identifier,
            content: item.content,
            published_at: item.published_at,
            fetched_at: item.fetched_at,
            metadata: item.metadata,
        }
    }
}

/// Output of the analysis service for one item. At most one per
/// `(source_item_id, analysis_type)` is ever stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub source_item_id: i64,
    pub analysis_type: String,
    pub provider: String,
    pub model: Option<String>,
    pub payload: Value,
    pub analyzed_at: DateTime<Utc>,
}
