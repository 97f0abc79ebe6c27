// src/enrich/mod.rs
//! Enrichment: pick stored items that have no result of the configured
//! analysis type yet, send them to the analyzer, store what comes back.
//!
//! Items that fail stay pending and are picked up again next cycle, so every
//! item is enriched at least once as long as the analyzer eventually answers.

pub mod analyzer;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use tokio_util::sync::CancellationToken;

use crate::fetch::{FetchError, Pacer};
use crate::model::{EnrichmentResult, SourceItem, SourceType};
use crate::scheduler::PollingJob;
use crate::store::{InsertOutcome, Store};

pub use analyzer::{Analyzer, HttpAnalyzer};

#[derive(Debug, Clone)]
pub struct EnrichmentSettings {
    pub analysis_type: String,
    pub source_types: Vec<SourceType>,
    pub batch_size: usize,
    pub interval: Duration,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            analysis_type: "sentiment".to_string(),
            source_types: vec![SourceType::Feed],
            batch_size: 5,
            interval: Duration::from_secs(300),
        }
    }
}

/// What one enrichment cycle did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnrichReport {
    pub selected: usize,
    pub enriched: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub rate_limited: bool,
    /// Items left for the next cycle after a rate limit.
    pub deferred: usize,
    pub store_errors: usize,
    pub cancelled: bool,
}

pub struct EnrichmentLoop {
    store: Arc<dyn Store>,
    analyzer: Arc<dyn Analyzer>,
    settings: EnrichmentSettings,
    pacer: Pacer,
}

impl EnrichmentLoop {
    pub fn new(
        store: Arc<dyn Store>,
        analyzer: Arc<dyn Analyzer>,
        settings: EnrichmentSettings,
        pacer: Pacer,
    ) -> Self {
        Self {
            store,
            analyzer,
            settings,
            pacer,
        }
    }

    pub fn pacer(&self) -> &Pacer {
        &self.pacer
    }

    async fn store_result(&self, item: &SourceItem, payload: serde_json::Value, report: &mut EnrichReport) {
        let result = EnrichmentResult {
            source_item_id: item.id,
            analysis_type: self.settings.analysis_type.clone(),
            provider: self.analyzer.provider_name().to_string(),
            model: self.analyzer.model_name().map(str::to_string),
            payload,
            analyzed_at: Utc::now(),
        };
        match self.store.insert_result(&result).await {
            Ok(InsertOutcome::Inserted) => {
                report.enriched += 1;
                counter!("enrich_results_total", "analysis_type" => self.settings.analysis_type.clone())
                    .increment(1);
            }
            // another worker got there first
            Ok(InsertOutcome::AlreadyPresent) => report.duplicates += 1,
            Err(e) => {
                report.store_errors += 1;
                tracing::error!(target: "enrich", item_id = item.id, error = %e, "failed to store result");
            }
        }
    }
}

#[async_trait]
impl PollingJob for EnrichmentLoop {
    type Report = EnrichReport;

    fn name(&self) -> &'static str {
        "enrichment"
    }

    fn interval(&self) -> Duration {
        self.settings.interval
    }

    async fn run_cycle(&mut self, cancel: &CancellationToken) -> EnrichReport {
        let mut report = EnrichReport::default();

        let pending = match self
            .store
            .pending_enrichment(
                &self.settings.analysis_type,
                &self.settings.source_types,
                self.settings.batch_size,
            )
            .await
        {
            Ok(items) => items,
            Err(e) => {
                tracing::error!(target: "enrich", error = %e, "could not select pending items");
                report.store_errors += 1;
                return report;
            }
        };
        report.selected = pending.len();
        if pending.is_empty() {
            tracing::debug!(target: "enrich", "nothing to enrich");
            return report;
        }

        let total = pending.len();
        for (idx, item) in pending.iter().enumerate() {
            if cancel.is_cancelled() || !self.pacer.ready(cancel).await {
                report.cancelled = true;
                break;
            }

            let outcome = self.analyzer.analyze(&item.content).await;
            self.pacer.record_call();

            match outcome {
                Ok(payload) => self.store_result(item, payload, &mut report).await,
                Err(e @ FetchError::RateLimited { .. }) => {
                    let window = self.pacer.cool_down(e.retry_after());
                    report.rate_limited = true;
                    report.deferred = total - idx;
                    counter!("enrich_failures_total", "kind" => e.kind()).increment(1);
                    tracing::warn!(
                        target: "enrich",
                        item_id = item.id,
                        cooldown_secs = window.as_secs(),
                        deferred = report.deferred,
                        "analyzer rate limited, deferring rest of batch"
                    );
                    break;
                }
                Err(e) => {
                    report.failed += 1;
                    counter!("enrich_failures_total", "kind" => e.kind()).increment(1);
                    tracing::warn!(
                        target: "enrich",
                        item_id = item.id,
                        kind = e.kind(),
                        error = %e,
                        "analysis failed, item stays pending"
                    );
                }
            }
        }

        report
    }
}
