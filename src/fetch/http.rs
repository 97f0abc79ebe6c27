// src/fetch/http.rs
use std::time::Duration;

use metrics::histogram;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Method, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{classify_status, retry, FetchError, RetryPolicy, MAX_WAIT};

const USER_AGENT: &str = "stock-insights-pipeline/0.1";

/// One logical outbound call. Cheap to clone; retried as a unit.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    pub timeout: Duration,
    pub query: Vec<(String, String)>,
    pub bearer: Option<String>,
    pub json: Option<Value>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            timeout,
            query: Vec::new(),
            bearer: None,
            json: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: Value, timeout: Duration) -> Self {
        Self {
            method: Method::POST,
            json: Some(body),
            ..Self::get(url, timeout)
        }
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn bearer(mut self, token: Option<String>) -> Self {
        self.bearer = token.filter(|t| !t.trim().is_empty());
        self
    }

    /// `host/path` of the request. Used in logs, so never carries the query.
    pub fn target(&self) -> String {
        match Url::parse(&self.url) {
            Ok(u) => format!("{}{}", u.host_str().unwrap_or_default(), u.path()),
            Err(_) => self.url.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    /// Decode the body. A malformed body is permanent: asking again returns
    /// the same bytes.
    pub fn json<T: DeserializeOwned>(&self, target: &str) -> Result<T, FetchError> {
        serde_json::from_str(&self.body).map_err(|e| FetchError::Permanent {
            target: target.to_string(),
            status: Some(self.status),
            reason: format!("malformed response: {e}"),
        })
    }
}

/// reqwest client plus the shared retry policy.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    policy: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(policy: RetryPolicy) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { client, policy })
    }

    pub fn with_client(client: Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn fetch(&self, req: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let target = req.target();
        let t0 = std::time::Instant::now();
        let out = retry(&self.policy, &target, |_| self.attempt(req, &target)).await;
        histogram!("fetch_duration_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        out
    }

    async fn attempt(&self, req: &FetchRequest, target: &str) -> Result<FetchResponse, FetchError> {
        let mut rb = self
            .client
            .request(req.method.clone(), &req.url)
            .timeout(req.timeout);
        if !req.query.is_empty() {
            rb = rb.query(&req.query);
        }
        if let Some(token) = &req.bearer {
            rb = rb.bearer_auth(token);
        }
        if let Some(body) = &req.json {
            rb = rb.json(body);
        }

        let resp = rb.send().await.map_err(|e| map_reqwest(target, e))?;
        let status = resp.status().as_u16();
        let retry_after = parse_retry_after(resp.headers());
        let body = resp.text().await.map_err(|e| map_reqwest(target, e))?;

        match classify_status(target, status, &body) {
            None => Ok(FetchResponse { status, body }),
            Some(FetchError::RateLimited { target, status, .. }) => Err(FetchError::RateLimited {
                target,
                status,
                retry_after,
            }),
            Some(e) => Err(e),
        }
    }
}

fn map_reqwest(target: &str, e: reqwest::Error) -> FetchError {
    if e.is_builder() {
        return FetchError::permanent(target, format!("invalid request: {e}"));
    }
    if e.is_timeout() {
        return FetchError::transient(target, "timed out");
    }
    FetchError::transient(target, e)
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(|secs| Duration::from_secs(secs).min(MAX_WAIT))
}
