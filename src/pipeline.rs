// src/pipeline.rs
//! Wires configured loops onto a [`Supervisor`].

use std::sync::Arc;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::enrich::{EnrichmentLoop, EnrichmentSettings, HttpAnalyzer};
use crate::fetch::{HttpFetcher, Pacer};
use crate::ingest::providers::{ProxySettings, RssFeedProvider, TrackedTickers};
use crate::ingest::types::{SourceProvider, StaticSources};
use crate::ingest::IngestionLoop;
use crate::scheduler::run_forever;
use crate::store::Store;
use crate::supervisor::Supervisor;

pub const FEED_LOOP: &str = "feed_ingestion";
pub const MARKET_LOOP: &str = "market_ingestion";
pub const ENRICH_LOOP: &str = "enrichment";

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

pub fn feed_loop(cfg: &PipelineConfig, store: Arc<dyn Store>, fetcher: &HttpFetcher) -> IngestionLoop {
    let f = &cfg.feeds;
    let providers: Vec<Arc<dyn SourceProvider>> = f
        .urls
        .iter()
        .map(|u| {
            Arc::new(RssFeedProvider::new(u.as_str(), secs(f.timeout_secs), fetcher.clone()))
                as Arc<dyn SourceProvider>
        })
        .collect();
    IngestionLoop::new(
        FEED_LOOP,
        Arc::new(StaticSources(providers)),
        store,
        Pacer::new(secs(f.min_spacing_secs), secs(f.cooldown_secs)),
        secs(f.interval_secs),
    )
}

pub fn market_loop(cfg: &PipelineConfig, store: Arc<dyn Store>, fetcher: &HttpFetcher) -> IngestionLoop {
    let m = &cfg.market;
    let settings = ProxySettings {
        base_url: m.proxy_url.clone(),
        days_back: m.days_back,
        timeout: secs(m.timeout_secs),
    };
    let tickers = TrackedTickers::new(store.clone(), m.tickers.clone(), settings, fetcher.clone());
    IngestionLoop::new(
        MARKET_LOOP,
        Arc::new(tickers),
        store,
        Pacer::new(secs(m.min_spacing_secs), secs(m.cooldown_secs)),
        secs(m.interval_secs),
    )
}

pub fn enrichment_loop(cfg: &PipelineConfig, store: Arc<dyn Store>, fetcher: &HttpFetcher) -> EnrichmentLoop {
    let e = &cfg.enrichment;
    if e.api_key.is_none() {
        tracing::warn!(target: "pipeline", "LLM_API_KEY not set, analyzer calls go out unauthenticated");
    }
    let analyzer = HttpAnalyzer::new(fetcher.clone(), &e.base_url, secs(e.timeout_secs))
        .with_api_key(e.api_key.clone())
        .with_identity(&e.provider, e.model.clone());
    EnrichmentLoop::new(
        store,
        Arc::new(analyzer),
        EnrichmentSettings {
            analysis_type: e.analysis_type.clone(),
            source_types: e.source_types.clone(),
            batch_size: e.batch_size,
            interval: secs(e.interval_secs),
        },
        Pacer::new(secs(e.min_spacing_secs), secs(e.cooldown_secs)),
    )
}

/// Spawn every enabled loop. Returns the names of what was started.
pub fn spawn_loops(
    cfg: &PipelineConfig,
    store: Arc<dyn Store>,
    fetcher: &HttpFetcher,
    sup: &mut Supervisor,
) -> Vec<&'static str> {
    let mut started = Vec::new();

    if cfg.feeds.enabled {
        if cfg.feeds.urls.is_empty() {
            tracing::warn!(target: "pipeline", "feed ingestion enabled with no feed urls");
        }
        let job = feed_loop(cfg, store.clone(), fetcher);
        sup.spawn(FEED_LOOP, move |token| async move {
            run_forever(job, token).await;
        });
        started.push(FEED_LOOP);
    }

    if cfg.market.enabled {
        let job = market_loop(cfg, store.clone(), fetcher);
        sup.spawn(MARKET_LOOP, move |token| async move {
            run_forever(job, token).await;
        });
        started.push(MARKET_LOOP);
    }

    if cfg.enrichment.enabled {
        let job = enrichment_loop(cfg, store, fetcher);
        sup.spawn(ENRICH_LOOP, move |token| async move {
            run_forever(job, token).await;
        });
        started.push(ENRICH_LOOP);
    }

    started
}

