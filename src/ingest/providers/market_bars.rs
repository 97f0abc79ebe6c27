// src/ingest/providers/market_bars.rs
//! Daily OHLCV bars through the market-data proxy, one provider per ticker.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use metrics::counter;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::fetch::{retry, FetchError, FetchRequest, HttpFetcher};
use crate::ingest::types::{Candidate, CandidateError, SourceProvider, SourceSet};
use crate::model::{NewSourceItem, SourceType};
use crate::store::Store;

/// Polygon-style aggregate envelope as passed through by the proxy.
#[derive(Debug, Deserialize)]
struct AggEnvelope {
    status: Option<String>,
    error: Option<String>,
    #[serde(default)]
    results: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct Bar {
    t: Option<i64>,
    o: Option<f64>,
    h: Option<f64>,
    l: Option<f64>,
    c: Option<f64>,
    v: Option<f64>,
}

/// Where and how to ask the proxy for bars.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub base_url: String,
    pub days_back: u32,
    pub timeout: Duration,
}

pub struct MarketBarsProvider {
    name: String,
    ticker: String,
    settings: ProxySettings,
    fetcher: HttpFetcher,
}

impl MarketBarsProvider {
    pub fn new(ticker: &str, settings: ProxySettings, fetcher: HttpFetcher) -> Self {
        let ticker = ticker.trim().to_ascii_uppercase();
        Self {
            name: format!("market:{ticker}"),
            ticker,
            settings,
            fetcher,
        }
    }

    /// `{base}/stock/{TICKER}/daily?days_back=N`, the ticker escaped as one
    /// path segment.
    fn request(&self) -> Result<FetchRequest, FetchError> {
        let mut url = Url::parse(&self.settings.base_url)
            .map_err(|e| FetchError::permanent(&self.name, format!("invalid proxy url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| FetchError::permanent(&self.name, "proxy url cannot take a path"))?
            .pop_if_empty()
            .extend(["stock", self.ticker.as_str(), "daily"]);
        Ok(FetchRequest::get(url.to_string(), self.settings.timeout)
            .query("days_back", self.settings.days_back))
    }
}

/// Parse the proxy body. An error envelope or undecodable body fails the
/// ticker; a bad bar fails only itself. Zero bars is a valid answer.
pub fn parse_bars(
    source_name: &str,
    ticker: &str,
    body: &str,
    fetched_at: DateTime<Utc>,
) -> Result<Vec<Candidate>, FetchError> {
    let env: AggEnvelope = serde_json::from_str(body)
        .map_err(|e| FetchError::permanent(source_name, format!("malformed proxy response: {e}")))?;

    match env.status.as_deref() {
        Some("ERROR") => {
            return Err(FetchError::permanent(
                source_name,
                env.error.unwrap_or_else(|| "upstream error envelope".into()),
            ))
        }
        Some("DELAYED") => {
            tracing::warn!(target: "ingest", source = source_name, "market data is delayed");
        }
        _ => {}
    }

    let bars = env.results.unwrap_or_default();
    counter!("ingest_events_total").increment(bars.len() as u64);
    Ok(bars
        .into_iter()
        .map(|raw| bar_to_item(source_name, ticker, raw, fetched_at))
        .collect())
}

fn bar_to_item(source_name: &str, ticker: &str, raw: Value, fetched_at: DateTime<Utc>) -> Candidate {
    let bar: Bar = serde_json::from_value(raw)
        .map_err(|e| CandidateError::new(source_name, format!("undecodable bar: {e}")))?;
    let ts = bar
        .t
        .ok_or_else(|| CandidateError::new(source_name, "bar without timestamp"))?;
    let day = DateTime::from_timestamp_millis(ts)
        .ok_or_else(|| CandidateError::new(source_name, format!("bar timestamp out of range: {ts}")))?
        .date_naive();
    let date = day.format("%Y-%m-%d").to_string();

    let content = json!({
        "ticker": ticker,
        "date": date,
        "open": bar.o,
        "high": bar.h,
        "low": bar.l,
        "close": bar.c,
        // proxy tier has no adjusted close; mirror close
        "adjusted_close": bar.c,
        "volume": bar.v,
    });

    let mut metadata = Map::new();
    metadata.insert("ticker".into(), Value::String(ticker.to_string()));
    metadata.insert("date".into(), Value::String(date.clone()));

    Ok(NewSourceItem {
        source_type: SourceType::MarketBar,
        source_identifier: format!("{ticker}:{date}"),
        content: content.to_string(),
        published_at: Some(day.and_time(NaiveTime::MIN).and_utc()),
        fetched_at,
        metadata,
    })
}

#[async_trait]
impl SourceProvider for MarketBarsProvider {
    async fn fetch_latest(&self) -> Result<Vec<Candidate>, FetchError> {
        let resp = self.fetcher.fetch(&self.request()?).await?;
        parse_bars(&self.name, &self.ticker, &resp.body, Utc::now())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Tickers to fetch: the configured list, or the store's `stocks` table
/// re-read each cycle when none are configured.
pub struct TrackedTickers {
    store: Arc<dyn Store>,
    configured: Vec<String>,
    settings: ProxySettings,
    fetcher: HttpFetcher,
}

impl TrackedTickers {
    pub fn new(
        store: Arc<dyn Store>,
        configured: Vec<String>,
        settings: ProxySettings,
        fetcher: HttpFetcher,
    ) -> Self {
        Self {
            store,
            configured,
            settings,
            fetcher,
        }
    }

    async fn tickers(&self) -> anyhow::Result<Vec<String>> {
        let raw = if self.configured.is_empty() {
            let store = &self.store;
            retry(self.fetcher.policy(), "stocks", |_| async move {
                store
                    .tracked_tickers()
                    .await
                    .map_err(|e| FetchError::transient("stocks", e))
            })
            .await?
        } else {
            self.configured.clone()
        };
        Ok(clean_tickers(raw))
    }
}

fn clean_tickers(raw: Vec<String>) -> Vec<String> {
    let set: BTreeSet<String> = raw
        .into_iter()
        .map(|t| t.trim().to_ascii_uppercase())
        .filter(|t| !t.is_empty())
        .collect();
    set.into_iter().collect()
}

#[async_trait]
impl SourceSet for TrackedTickers {
    async fn providers(&self) -> anyhow::Result<Vec<Arc<dyn SourceProvider>>> {
        let tickers = self.tickers().await?;
        if tickers.is_empty() {
            tracing::warn!(target: "ingest", "no tickers configured or tracked");
        }
        Ok(tickers
            .iter()
            .map(|t| {
                Arc::new(MarketBarsProvider::new(t, self.settings.clone(), self.fetcher.clone()))
                    as Arc<dyn SourceProvider>
            })
            .collect())
    }
}
