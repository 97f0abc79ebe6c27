// src/config.rs
//! Pipeline configuration.
//!
//! Resolution order:
//! 1) `$PIPELINE_CONFIG_PATH` (must exist if set)
//! 2) `config/pipeline.toml`
//! 3) built-in defaults
//!
//! Secrets and endpoints are then overridden from the environment
//! (`DATABASE_URL`, `LLM_API_KEY`, `LLM_API_BASE_URL`, `DATA_SOURCE_PROXY_URL`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

use crate::fetch::RetryPolicy;
use crate::model::SourceType;

pub const ENV_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";

/// Shortest rate-limit cooldown accepted from config.
pub const MIN_COOLDOWN_SECS: u64 = 60;
/// Longest spacing, cooldown or retry wait accepted from config.
pub const MAX_WAIT_SECS: u64 = crate::fetch::MAX_WAIT.as_secs();
/// Longest poll interval accepted from config (one week).
pub const MAX_INTERVAL_SECS: u64 = 7 * 86_400;

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedsConfig {
    #[serde(default = "yes")]
    pub enabled: bool,
    pub urls: Vec<String>,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub min_spacing_secs: u64,
    pub cooldown_secs: u64,
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            urls: vec![
                "https://finance.yahoo.com/news/rssindex".into(),
                "https://feeds.finance.yahoo.com/rss/2.0/headline?s=^GSPC&region=US&lang=en-US".into(),
            ],
            interval_secs: 900,
            timeout_secs: 15,
            min_spacing_secs: 0,
            cooldown_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    #[serde(default = "yes")]
    pub enabled: bool,
    pub proxy_url: String,
    /// Empty means: read the `stocks` table every cycle.
    pub tickers: Vec<String>,
    pub days_back: u32,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    /// 5 calls/minute on the free tier.
    pub min_spacing_secs: u64,
    pub cooldown_secs: u64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            proxy_url: "http://data-source-proxy:8001".into(),
            tickers: Vec::new(),
            days_back: 35,
            interval_secs: 86_400,
            timeout_secs: 20,
            min_spacing_secs: 13,
            cooldown_secs: 65,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    #[serde(default = "yes")]
    pub enabled: bool,
    pub base_url: String,
    pub api_key: Option<String>,
    pub provider: String,
    pub model: Option<String>,
    pub analysis_type: String,
    pub source_types: Vec<SourceType>,
    pub batch_size: usize,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub min_spacing_secs: u64,
    pub cooldown_secs: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.llmprovider.com".into(),
            api_key: None,
            provider: "llm".into(),
            model: None,
            analysis_type: "sentiment".into(),
            source_types: vec![SourceType::Feed],
            batch_size: 5,
            interval_secs: 300,
            timeout_secs: 30,
            min_spacing_secs: 0,
            cooldown_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// `None` disables the metrics/health listener.
    pub metrics_addr: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            metrics_addr: Some("0.0.0.0:9100".into()),
        }
    }
}

fn default_grace_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub feeds: FeedsConfig,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default = "default_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            feeds: FeedsConfig::default(),
            market: MarketConfig::default(),
            enrichment: EnrichmentConfig::default(),
            retry: RetryPolicy::default(),
            server: ServerConfig::default(),
            shutdown_grace_secs: default_grace_secs(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: PipelineConfig = toml::from_str(s).context("parsing pipeline config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// File (env path, then default path, then defaults) plus env overrides.
    pub fn load() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let default = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default.exists() {
                Self::load_from(&default)?
            } else {
                tracing::info!(target: "config", "no config file found, using defaults");
                Self::default()
            }
        };
        cfg.apply_env_with(|k| std::env::var(k).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply env overrides through `get`. Blank values are ignored.
    pub fn apply_env_with<F>(&mut self, get: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| get(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        if let Some(v) = get("DATABASE_URL") {
            self.database.url = Some(v);
        }
        if let Some(v) = get("LLM_API_KEY") {
            self.enrichment.api_key = Some(v);
        }
        if let Some(v) = get("LLM_API_BASE_URL") {
            self.enrichment.base_url = v;
        }
        if let Some(v) = get("DATA_SOURCE_PROXY_URL") {
            self.market.proxy_url = v;
        }
    }

    /// Reject unusable values and clamp cooldowns into `[60s, MAX_WAIT_SECS]`.
    pub fn validate(&mut self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if !self.retry.backoff_secs.is_finite()
            || self.retry.backoff_secs < 0.0
            || self.retry.backoff_secs > MAX_WAIT_SECS as f64
        {
            bail!("retry.backoff_secs must be between 0 and {MAX_WAIT_SECS}");
        }
        for (section, interval, timeout, spacing) in [
            (
                "feeds",
                self.feeds.interval_secs,
                self.feeds.timeout_secs,
                self.feeds.min_spacing_secs,
            ),
            (
                "market",
                self.market.interval_secs,
                self.market.timeout_secs,
                self.market.min_spacing_secs,
            ),
            (
                "enrichment",
                self.enrichment.interval_secs,
                self.enrichment.timeout_secs,
                self.enrichment.min_spacing_secs,
            ),
        ] {
            if interval == 0 || interval > MAX_INTERVAL_SECS {
                bail!("{section}.interval_secs must be between 1 and {MAX_INTERVAL_SECS}");
            }
            if timeout == 0 || timeout > MAX_WAIT_SECS {
                bail!("{section}.timeout_secs must be between 1 and {MAX_WAIT_SECS}");
            }
            if spacing > MAX_WAIT_SECS {
                bail!("{section}.min_spacing_secs must not exceed {MAX_WAIT_SECS}");
            }
        }
        if self.enrichment.batch_size == 0 {
            bail!("enrichment.batch_size must be positive");
        }
        for cd in [
            &mut self.feeds.cooldown_secs,
            &mut self.market.cooldown_secs,
            &mut self.enrichment.cooldown_secs,
        ] {
            *cd = (*cd).clamp(MIN_COOLDOWN_SECS, MAX_WAIT_SECS);
        }
        Ok(())
    }

    pub fn database_url(&self) -> Result<&str> {
        self.database
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| anyhow!("DATABASE_URL is not set"))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_free_tier_pacing() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.market.min_spacing_secs, 13);
        assert_eq!(cfg.market.cooldown_secs, 65);
        assert_eq!(cfg.feeds.interval_secs, 900);
        assert_eq!(cfg.enrichment.interval_secs, 300);
        assert_eq!(cfg.enrichment.batch_size, 5);
        assert_eq!(cfg.retry.max_attempts, 3);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let cfg = PipelineConfig::from_toml_str(
            r#"
            [market]
            tickers = ["AAPL", "MSFT"]
            cooldown_secs = 5

            [enrichment]
            source_types = ["rss", "market_bar"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.market.tickers, vec!["AAPL", "MSFT"]);
        assert_eq!(cfg.market.cooldown_secs, MIN_COOLDOWN_SECS);
        assert_eq!(cfg.market.min_spacing_secs, 13);
        assert_eq!(
            cfg.enrichment.source_types,
            vec![SourceType::Feed, SourceType::MarketBar]
        );
        assert!(cfg.feeds.enabled);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = PipelineConfig::from_toml_str("[feeds]\ninterval_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("feeds.interval_secs"));
        assert!(PipelineConfig::from_toml_str("[retry]\nmax_attempts = 0\n").is_err());
    }

    #[test]
    fn env_overrides_apply_and_ignore_blanks() {
        let env: HashMap<&str, &str> = [
            ("DATABASE_URL", "postgres://u:p@db/app"),
            ("LLM_API_KEY", "  "),
            ("DATA_SOURCE_PROXY_URL", "http://proxy:9000"),
        ]
        .into_iter()
        .collect();
        let mut cfg = PipelineConfig::default();
        cfg.apply_env_with(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.database_url().unwrap(), "postgres://u:p@db/app");
        assert!(cfg.enrichment.api_key.is_none());
        assert_eq!(cfg.market.proxy_url, "http://proxy:9000");
        assert_eq!(cfg.enrichment.base_url, "https://api.llmprovider.com");
    }

    #[test]
    fn zero_timeout_and_huge_spacing_are_rejected() {
        let err = PipelineConfig::from_toml_str("[enrichment]\ntimeout_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("enrichment.timeout_secs"));

        let err = PipelineConfig::from_toml_str("[market]\nmin_spacing_secs = 9999999999\n")
            .unwrap_err();
        assert!(err.to_string().contains("market.min_spacing_secs"));

        assert!(PipelineConfig::from_toml_str("[feeds]\ninterval_secs = 9999999999\n").is_err());
        assert!(PipelineConfig::from_toml_str("[retry]\nbackoff_secs = 1e300\n").is_err());

        let cfg = PipelineConfig::from_toml_str("[market]\ncooldown_secs = 9999999999\n").unwrap();
        assert_eq!(cfg.market.cooldown_secs, MAX_WAIT_SECS);
    }

    #[test]
    fn missing_database_url_is_an_error() {
        assert!(PipelineConfig::default().database_url().is_err());
    }
}
