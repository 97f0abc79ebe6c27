// tests/enrich_loop.rs
mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::{feed_item, ScriptedAnalyzer};
use serde_json::json;
use stock_insights_pipeline::enrich::{EnrichmentLoop, EnrichmentSettings};
use stock_insights_pipeline::fetch::{FetchError, Pacer};
use stock_insights_pipeline::scheduler::{run_forever, PollingJob};
use stock_insights_pipeline::{MemoryStore, NewSourceItem, SourceType, Store};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

async fn seeded(n: usize) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for i in 0..n {
        store
            .insert_item(&feed_item(&format!("guid-{i}"), &format!("headline {i}")))
            .await
            .unwrap();
    }
    store
}

fn job(store: Arc<MemoryStore>, analyzer: Arc<ScriptedAnalyzer>) -> EnrichmentLoop {
    EnrichmentLoop::new(
        store,
        analyzer,
        EnrichmentSettings::default(),
        Pacer::new(Duration::ZERO, Duration::from_secs(60)),
    )
}

#[tokio::test(start_paused = true)]
async fn every_item_is_eventually_enriched_exactly_once() {
    let store = seeded(12).await;
    let analyzer = ScriptedAnalyzer::new(vec![
        Err(FetchError::transient("llm", "timeout")),
        Ok(json!({ "label": "positive" })),
        Err(FetchError::permanent("llm", "422")),
        Err(FetchError::transient("llm", "502")),
    ]);
    let mut j = job(store.clone(), analyzer);
    let token = CancellationToken::new();

    for _ in 0..10 {
        j.run_cycle(&token).await;
    }

    let results = store.results();
    assert_eq!(results.len(), 12);
    let mut per_item: HashMap<i64, usize> = HashMap::new();
    for r in &results {
        *per_item.entry(r.source_item_id).or_default() += 1;
        assert_eq!(r.analysis_type, "sentiment");
        assert_eq!(r.provider, "scripted");
        assert_eq!(r.model.as_deref(), Some("scripted-v1"));
    }
    assert!(per_item.values().all(|n| *n == 1));
    assert!(store
        .pending_enrichment("sentiment", &[SourceType::Feed], 5)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test(start_paused = true)]
async fn rate_limited_item_stays_pending_until_cooldown_passes() {
    let store = seeded(1).await;
    let analyzer = ScriptedAnalyzer::new(vec![Err(FetchError::RateLimited {
        target: "llm".into(),
        status: 429,
        retry_after: None,
    })]);
    let mut j = job(store.clone(), analyzer.clone());
    let token = CancellationToken::new();

    let r = j.run_cycle(&token).await;
    assert!(r.rate_limited);
    assert_eq!(r.deferred, 1);
    let pending = store
        .pending_enrichment("sentiment", &[SourceType::Feed], 5)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);

    let r = j.run_cycle(&token).await;
    assert_eq!(r.enriched, 1);

    let calls = analyzer.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].0.duration_since(calls[0].0) >= Duration::from_secs(60));
    assert_eq!(store.result_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn retry_after_longer_than_cooldown_is_honoured() {
    let store = seeded(2).await;
    let analyzer = ScriptedAnalyzer::new(vec![Err(FetchError::RateLimited {
        target: "llm".into(),
        status: 429,
        retry_after: Some(Duration::from_secs(120)),
    })]);
    let mut j = job(store.clone(), analyzer.clone());
    let token = CancellationToken::new();

    j.run_cycle(&token).await;
    j.run_cycle(&token).await;

    let calls = analyzer.calls.lock().unwrap().clone();
    assert!(calls[1].0.duration_since(calls[0].0) >= Duration::from_secs(120));
    assert_eq!(store.result_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn market_bars_are_ignored_unless_selected() {
    let store = seeded(1).await;
    store
        .insert_item(&NewSourceItem {
            source_type: SourceType::MarketBar,
            ..feed_item("AAPL:2024-05-14", "{\"close\":187.4}")
        })
        .await
        .unwrap();
    let analyzer = ScriptedAnalyzer::new(vec![]);
    let mut j = job(store.clone(), analyzer.clone());
    let r = j.run_cycle(&CancellationToken::new()).await;
    assert_eq!(r.enriched, 1);
    assert_eq!(analyzer.calls.lock().unwrap()[0].1, "headline 0");

    let mut both = EnrichmentLoop::new(
        store.clone(),
        analyzer,
        EnrichmentSettings {
            source_types: vec![SourceType::Feed, SourceType::MarketBar],
            ..EnrichmentSettings::default()
        },
        Pacer::new(Duration::ZERO, Duration::from_secs(60)),
    );
    let r = both.run_cycle(&CancellationToken::new()).await;
    assert_eq!(r.enriched, 1);
    assert_eq!(store.result_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn loop_drains_backlog_then_stops_on_cancel() {
    let store = seeded(11).await;
    let analyzer = ScriptedAnalyzer::new(vec![]);
    let token = CancellationToken::new();
    let handle = tokio::spawn(run_forever(job(store.clone(), analyzer), token.clone()));

    // three cycles at t=0, 300, 600
    tokio::time::sleep(Duration::from_secs(650)).await;
    token.cancel();
    let started = Instant::now();
    handle.await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(store.result_count(), 11);
}
