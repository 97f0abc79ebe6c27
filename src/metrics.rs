// src/metrics.rs
use std::sync::Arc;

use anyhow::Context;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use serde_json::json;
use tokio::net::TcpListener;

use crate::store::Store;

/// One-time metrics registration (so series show up on /metrics).
pub fn describe_pipeline_metrics() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_cycles_total", "Completed cycles per loop.");
        describe_gauge!("pipeline_last_cycle_ts", "Unix ts when a loop last finished a cycle.");
        describe_counter!("fetch_attempts_total", "Outbound call attempts, retries included.");
        describe_counter!("fetch_retries_total", "Attempts repeated after a transient failure.");
        describe_histogram!("fetch_duration_ms", "Outbound call latency in milliseconds.");
        describe_counter!("ingest_events_total", "Entries parsed from provider responses.");
        describe_histogram!("ingest_parse_ms", "Provider parse time in milliseconds.");
        describe_counter!("ingest_items_inserted_total", "Items stored for the first time.");
        describe_counter!(
            "ingest_items_duplicate_total",
            "Items skipped because their dedup key was already stored."
        );
        describe_counter!(
            "ingest_candidates_rejected_total",
            "Entries dropped as malformed before storage."
        );
        describe_counter!("ingest_source_errors_total", "Source fetches that failed, by kind.");
        describe_counter!("enrich_results_total", "Analysis results stored.");
        describe_counter!("enrich_failures_total", "Analyzer calls that failed, by kind.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Fails if one is already set.
    pub fn install() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        describe_pipeline_metrics();
        Ok(Self { handle })
    }

    pub fn from_handle(handle: PrometheusHandle) -> Self {
        Self { handle }
    }

    /// `/metrics` in Prometheus exposition format, `/health` backed by a store ping.
    pub fn router(&self, store: Arc<dyn Store>) -> Router {
        let handle = self.handle.clone();
        Router::new()
            .route(
                "/metrics",
                get(move || {
                    let h = handle.clone();
                    async move { h.render() }
                }),
            )
            .route("/health", get(health))
            .with_state(store)
    }
}

/// Bind the metrics listener, if one is configured.
pub async fn bind_listener(addr: Option<&str>) -> anyhow::Result<Option<TcpListener>> {
    let Some(addr) = addr else {
        return Ok(None);
    };
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding metrics listener on {addr}"))?;
    Ok(Some(listener))
}

async fn health(State(store): State<Arc<dyn Store>>) -> (StatusCode, Json<serde_json::Value>) {
    match store.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(e) => {
            tracing::warn!(target: "pipeline", error = %e, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable", "error": e.to_string() })),
            )
        }
    }
}
