// src/fetch/mod.rs
//! Rate-limited fetcher: typed failure classes, bounded retry, and pacing.
//!
//! Every outbound call (feeds, market-data proxy, analysis service) goes through
//! [`retry`], which retries only transient failures. Permanent and rate-limited
//! outcomes come back to the caller untouched so it can skip the unit or cool
//! down the source.

pub mod http;
pub mod pacer;

use std::future::Future;
use std::time::Duration;

use metrics::counter;
use serde::Deserialize;
use thiserror::Error;
use tokio::time::Instant;

pub use http::{FetchRequest, FetchResponse, HttpFetcher};
pub use pacer::Pacer;

/// Longest pause a pacer will take, whatever the upstream or config asks for.
pub const MAX_WAIT: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Network error, timeout or 5xx. Worth another attempt.
    #[error("transient failure from {target}: {reason}")]
    Transient { target: String, reason: String },

    /// 429 or a provider over-quota signal. The source must cool down.
    #[error("{target} is rate limiting (status {status})")]
    RateLimited {
        target: String,
        status: u16,
        retry_after: Option<Duration>,
    },

    /// 4xx or a malformed/error-envelope response. Retrying will not help.
    #[error("permanent failure from {target}: {reason}")]
    Permanent {
        target: String,
        status: Option<u16>,
        reason: String,
    },
}

impl FetchError {
    pub fn transient(target: impl Into<String>, reason: impl ToString) -> Self {
        FetchError::Transient {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    pub fn permanent(target: impl Into<String>, reason: impl ToString) -> Self {
        FetchError::Permanent {
            target: target.into(),
            status: None,
            reason: reason.to_string(),
        }
    }

    pub fn rate_limited(target: impl Into<String>, status: u16) -> Self {
        FetchError::RateLimited {
            target: target.into(),
            status,
            retry_after: None,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Short label for logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Transient { .. } => "transient",
            FetchError::RateLimited { .. } => "rate_limited",
            FetchError::Permanent { .. } => "permanent",
        }
    }
}

/// Map an HTTP status to a failure class. `None` means success.
pub fn classify_status(target: &str, status: u16, body: &str) -> Option<FetchError> {
    match status {
        200..=399 => None,
        429 => Some(FetchError::rate_limited(target, status)),
        400..=499 => Some(FetchError::Permanent {
            target: target.to_string(),
            status: Some(status),
            reason: snippet(body),
        }),
        _ => Some(FetchError::transient(
            target,
            format!("status {status}: {}", snippet(body)),
        )),
    }
}

fn snippet(body: &str) -> String {
    let t = body.trim();
    if t.chars().count() > 200 {
        let mut s: String = t.chars().take(200).collect();
        s.push('…');
        s
    } else {
        t.to_string()
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_secs() -> f64 {
    2.0
}

/// Fixed-wait retry policy. `max_attempts` counts the first try.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_secs: default_backoff_secs(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff_secs: backoff.as_secs_f64(),
        }
    }

    pub fn backoff(&self) -> Duration {
        Duration::try_from_secs_f64(self.backoff_secs.max(0.0))
            .unwrap_or(MAX_WAIT)
            .min(MAX_WAIT)
    }
}

/// Bookkeeping for one logical fetch, retries included. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct FetchAttempt {
    pub count: u32,
    pub last_error: Option<FetchError>,
    pub next_allowed: Option<Instant>,
}

/// Run `op` until it succeeds, fails non-transiently, or the policy runs out.
///
/// `op` receives the 1-based attempt number. The wait between attempts is not
/// cancellable; it is short and bounded by the policy.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, target: &str, mut op: F) -> Result<T, FetchError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let max = policy.max_attempts.max(1);
    let mut attempt = FetchAttempt::default();
    loop {
        if let Some(at) = attempt.next_allowed.take() {
            tokio::time::sleep_until(at).await;
        }
        attempt.count += 1;
        counter!("fetch_attempts_total").increment(1);

        match op(attempt.count).await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt.count < max => {
                tracing::warn!(
                    target: "fetch",
                    %target,
                    attempt = attempt.count,
                    max_attempts = max,
                    error = %e,
                    "transient failure, retrying"
                );
                counter!("fetch_retries_total").increment(1);
                attempt.next_allowed = Some(Instant::now() + policy.backoff());
                attempt.last_error = Some(e);
            }
            Err(e) => {
                if e.is_transient() {
                    tracing::warn!(
                        target: "fetch",
                        %target,
                        attempts = attempt.count,
                        error = %e,
                        "retries exhausted"
                    );
                }
                return Err(e);
            }
        }
    }
}
