// src/ingest/providers/mod.rs
pub mod market_bars;
pub mod rss_feed;

pub use market_bars::{MarketBarsProvider, ProxySettings, TrackedTickers};
pub use rss_feed::RssFeedProvider;
