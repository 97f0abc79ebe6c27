//! Pipeline binary.
//! Loads config, connects storage, starts the ingestion and enrichment loops
//! and the metrics/health listener, then waits for a shutdown signal.

use std::sync::Arc;

use anyhow::Context;
use stock_insights_pipeline::{
    fetch::HttpFetcher,
    metrics::{bind_listener, Metrics},
    pipeline::spawn_loops,
    store::{PgStore, Store},
    supervisor::{shutdown_signal, Supervisor},
    PipelineConfig,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact logs by default, JSON lines with `LOG_FORMAT=json`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("stock_insights_pipeline=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = PipelineConfig::load().context("loading pipeline config")?;
    let metrics = Metrics::install().context("installing metrics recorder")?;
    // Bind before connecting or spawning, so a bad address leaves nothing to unwind.
    let listener = bind_listener(cfg.server.metrics_addr.as_deref()).await?;

    let store: Arc<dyn Store> = Arc::new(
        PgStore::connect(cfg.database_url()?, cfg.database.max_connections)
            .await
            .context("connecting to database")?,
    );
    let fetcher = HttpFetcher::new(cfg.retry.clone())?;

    let mut sup = Supervisor::new();
    let started = spawn_loops(&cfg, store.clone(), &fetcher, &mut sup);
    tracing::info!(loops = ?started, "pipeline running");

    if let Some(listener) = listener {
        tracing::info!(addr = ?listener.local_addr().ok(), "serving /metrics and /health");
        let app = metrics.router(store.clone());
        sup.spawn("metrics_server", move |token| async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                tracing::error!(error = %e, "metrics server failed");
            }
        });
    }

    shutdown_signal().await;
    tracing::info!("shutdown signal received");

    let exits = sup.shutdown(cfg.shutdown_grace()).await;
    let unclean: Vec<_> = exits.iter().filter(|e| !e.clean).map(|e| e.name).collect();
    store.close().await;

    if unclean.is_empty() {
        tracing::info!("pipeline stopped");
        Ok(())
    } else {
        anyhow::bail!("tasks ended abnormally: {unclean:?}")
    }
}
