// src/enrich/analyzer.rs
//! Analysis service client. Separated from the loop so tests can swap in a
//! scripted implementation.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::fetch::{FetchError, FetchRequest, HttpFetcher};

#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Analyze one text payload. The result is stored as-is.
    async fn analyze(&self, text: &str) -> Result<Value, FetchError>;
    /// Provider name recorded next to each result.
    fn provider_name(&self) -> &str;
    fn model_name(&self) -> Option<&str> {
        None
    }
}

/// `POST {base}/analyze` with `{"text": ...}` and a bearer token.
pub struct HttpAnalyzer {
    fetcher: HttpFetcher,
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
    provider: String,
    model: Option<String>,
}

impl HttpAnalyzer {
    pub fn new(fetcher: HttpFetcher, base_url: &str, timeout: Duration) -> Self {
        Self {
            fetcher,
            endpoint: format!("{}/analyze", base_url.trim_end_matches('/')),
            api_key: None,
            timeout,
            provider: "llm".to_string(),
            model: None,
        }
    }

    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key;
        self
    }

    pub fn with_identity(mut self, provider: &str, model: Option<String>) -> Self {
        self.provider = provider.to_string();
        self.model = model;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Analyzer for HttpAnalyzer {
    async fn analyze(&self, text: &str) -> Result<Value, FetchError> {
        let req = FetchRequest::post_json(self.endpoint.as_str(), json!({ "text": text }), self.timeout)
            .bearer(self.api_key.clone());
        let resp = self.fetcher.fetch(&req).await?;
        resp.json::<Value>(&req.target())
    }

    fn provider_name(&self) -> &str {
        &self.provider
    }

    fn model_name(&self) -> Option<&str> {
        self.model.as_deref()
    }
}
