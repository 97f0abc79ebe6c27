// src/ingest/types.rs
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::fetch::FetchError;
use crate::model::NewSourceItem;

/// A single upstream entry that could not be turned into an item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rejected entry from {source_name}: {reason}")]
pub struct CandidateError {
    pub source_name: String,
    pub reason: String,
}

impl CandidateError {
    pub fn new(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }
}

/// One entry of a fetched batch. Entries fail independently.
pub type Candidate = Result<NewSourceItem, CandidateError>;

#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Fetch the current batch. A transport or envelope failure fails the
    /// whole source; a bad entry only fails its own [`Candidate`].
    async fn fetch_latest(&self) -> Result<Vec<Candidate>, FetchError>;
    fn name(&self) -> &str;
}

/// The list of providers an ingestion loop walks each cycle.
#[async_trait]
pub trait SourceSet: Send + Sync {
    async fn providers(&self) -> anyhow::Result<Vec<Arc<dyn SourceProvider>>>;
}

/// A fixed list, decided at startup.
pub struct StaticSources(pub Vec<Arc<dyn SourceProvider>>);

#[async_trait]
impl SourceSet for StaticSources {
    async fn providers(&self) -> anyhow::Result<Vec<Arc<dyn SourceProvider>>> {
        Ok(self.0.clone())
    }
}
