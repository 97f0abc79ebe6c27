// src/ingest/mod.rs
//! Fetch-and-store: walk the sources, drop what is already known, persist
//! the rest.

pub mod dedup;
pub mod providers;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use once_cell::sync::OnceCell;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::fetch::{FetchError, Pacer};
use crate::scheduler::PollingJob;
use crate::store::Store;
use dedup::{Admission, DedupIndex};
use types::{Candidate, SourceSet};

const MAX_TEXT_CHARS: usize = 4000;

/// Normalize feed text: decode entities, strip tags, straighten quotes,
/// collapse whitespace, cap length.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    out = re_tags.replace_all(&out, " ").to_string();

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"));
    out = re_ws.replace_all(&out, " ").trim().to_string();

    if out.chars().count() > MAX_TEXT_CHARS {
        out = out.chars().take(MAX_TEXT_CHARS).collect();
    }
    out
}

/// What one ingestion cycle did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub sources: usize,
    pub fetched_sources: usize,
    pub failed_sources: usize,
    pub rate_limited_sources: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub store_errors: usize,
    pub cancelled: bool,
}

pub struct IngestionLoop {
    name: &'static str,
    sources: Arc<dyn SourceSet>,
    dedup: DedupIndex,
    pacer: Pacer,
    interval: Duration,
}

impl IngestionLoop {
    pub fn new(
        name: &'static str,
        sources: Arc<dyn SourceSet>,
        store: Arc<dyn Store>,
        pacer: Pacer,
        interval: Duration,
    ) -> Self {
        Self {
            name,
            sources,
            dedup: DedupIndex::new(store),
            pacer,
            interval,
        }
    }

    pub fn pacer(&self) -> &Pacer {
        &self.pacer
    }

    fn on_source_error(&mut self, source: &str, err: &FetchError, report: &mut IngestReport) {
        counter!("ingest_source_errors_total", "loop" => self.name, "kind" => err.kind()).increment(1);
        match err {
            FetchError::RateLimited { retry_after, .. } => {
                let window = self.pacer.cool_down(*retry_after);
                report.rate_limited_sources += 1;
                tracing::warn!(
                    target: "ingest",
                    loop_name = self.name,
                    source,
                    cooldown_secs = window.as_secs(),
                    error = %err,
                    "rate limited, cooling down before next source"
                );
            }
            _ => {
                report.failed_sources += 1;
                tracing::warn!(
                    target: "ingest",
                    loop_name = self.name,
                    source,
                    kind = err.kind(),
                    error = %err,
                    "source failed, skipping"
                );
            }
        }
    }

    async fn persist(
        &self,
        source: &str,
        candidates: Vec<Candidate>,
        cancel: &CancellationToken,
        report: &mut IngestReport,
    ) {
        for candidate in candidates {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return;
            }
            let item = match candidate {
                Ok(item) => item,
                Err(e) => {
                    report.rejected += 1;
                    counter!("ingest_candidates_rejected_total", "loop" => self.name).increment(1);
                    tracing::debug!(target: "ingest", source, error = %e, "entry skipped");
                    continue;
                }
            };
            match self.dedup.admit(&item).await {
                Ok(Admission::New) => {
                    report.inserted += 1;
                    counter!("ingest_items_inserted_total", "loop" => self.name).increment(1);
                }
                Ok(Admission::Seen) => {
                    report.duplicates += 1;
                    counter!("ingest_items_duplicate_total", "loop" => self.name).increment(1);
                }
                Err(e) => {
                    report.store_errors += 1;
                    tracing::error!(
                        target: "ingest",
                        source,
                        identifier = %item.source_identifier,
                        error = %e,
                        "failed to persist item"
                    );
                }
            }
        }
    }
}

#[async_trait]
impl PollingJob for IngestionLoop {
    type Report = IngestReport;

    fn name(&self) -> &'static str {
        self.name
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run_cycle(&mut self, cancel: &CancellationToken) -> IngestReport {
        let mut report = IngestReport::default();

        let providers = match self.sources.providers().await {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(target: "ingest", loop_name = self.name, error = %e, "could not list sources");
                return report;
            }
        };
        report.sources = providers.len();

        for provider in providers {
            if !self.pacer.ready(cancel).await {
                report.cancelled = true;
                break;
            }

            let fetched = provider.fetch_latest().await;
            self.pacer.record_call();

            match fetched {
                Ok(candidates) => {
                    report.fetched_sources += 1;
                    self.persist(provider.name(), candidates, cancel, &mut report)
                        .await;
                    if report.cancelled {
                        break;
                    }
                }
                Err(e) => self.on_source_error(provider.name(), &e, &mut report),
            }
        }

        report
    }
}
