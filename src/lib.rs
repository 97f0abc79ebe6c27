// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod enrich;
pub mod fetch;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod scheduler;
pub mod store;
pub mod supervisor;

// ---- Re-exports for stable public API ----
pub use crate::config::PipelineConfig;
pub use crate::model::{EnrichmentResult, NewSourceItem, SourceItem, SourceType};
pub use crate::store::{InsertOutcome, MemoryStore, PgStore, Store, StoreError};
pub use crate::supervisor::Supervisor;
