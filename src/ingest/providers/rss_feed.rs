// src/ingest/providers/rss_feed.rs
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;
use serde_json::{Map, Value};
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use crate::fetch::{FetchError, FetchRequest, HttpFetcher};
use crate::ingest::normalize_text;
use crate::ingest::types::{Candidate, CandidateError, SourceProvider};
use crate::model::{NewSourceItem, SourceType};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<Guid>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Guid {
    #[serde(rename = "$text")]
    value: Option<String>,
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    OffsetDateTime::parse(ts.trim(), &Rfc2822)
        .ok()
        .and_then(|dt| DateTime::from_timestamp(dt.unix_timestamp(), 0))
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// Polls one RSS 2.0 feed URL.
pub struct RssFeedProvider {
    name: String,
    url: String,
    timeout: Duration,
    fetcher: HttpFetcher,
}

impl RssFeedProvider {
    pub fn new(url: impl Into<String>, timeout: Duration, fetcher: HttpFetcher) -> Self {
        let url = url.into();
        let name = format!("feed:{}", FetchRequest::get(url.as_str(), timeout).target());
        Self {
            name,
            url,
            timeout,
            fetcher,
        }
    }
}

/// Parse an RSS document into candidates. Malformed XML fails the whole
/// document; an entry without identity or text fails only itself.
pub fn parse_feed(source_name: &str, xml: &str, fetched_at: DateTime<Utc>) -> Result<Vec<Candidate>, FetchError> {
    let t0 = std::time::Instant::now();
    let xml_clean = scrub_html_entities_for_xml(xml);
    let rss: Rss = from_str(&xml_clean)
        .map_err(|e| FetchError::permanent(source_name, format!("malformed rss: {e}")))?;

    let out: Vec<Candidate> = rss
        .channel
        .item
        .into_iter()
        .map(|it| entry_to_item(source_name, it, fetched_at))
        .collect();

    histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    counter!("ingest_events_total").increment(out.len() as u64);
    Ok(out)
}

fn entry_to_item(source_name: &str, it: Item, fetched_at: DateTime<Utc>) -> Candidate {
    let identifier = non_empty(it.guid.as_ref().and_then(|g| g.value.as_deref()))
        .or_else(|| non_empty(it.link.as_deref()))
        .map(str::to_string)
        .ok_or_else(|| CandidateError::new(source_name, "entry has neither guid nor link"))?;

    let title = normalize_text(it.title.as_deref().unwrap_or_default());
    let summary = normalize_text(it.description.as_deref().unwrap_or_default());
    if title.is_empty() && summary.is_empty() {
        return Err(CandidateError::new(
            source_name,
            format!("entry {identifier} has no text"),
        ));
    }

    let mut metadata = Map::new();
    metadata.insert("link".into(), it.link.clone().map_or(Value::Null, Value::String));
    metadata.insert("title".into(), Value::String(title.clone()));
    metadata.insert("summary".into(), Value::String(summary.clone()));
    metadata.insert("feed".into(), Value::String(source_name.to_string()));

    Ok(NewSourceItem {
        source_type: SourceType::Feed,
        source_identifier: identifier,
        content: format!("{title}\n{summary}"),
        published_at: it.pub_date.as_deref().and_then(parse_rfc2822),
        fetched_at,
        metadata,
    })
}

#[async_trait]
impl SourceProvider for RssFeedProvider {
    async fn fetch_latest(&self) -> Result<Vec<Candidate>, FetchError> {
        let resp = self
            .fetcher
            .fetch(&FetchRequest::get(self.url.as_str(), self.timeout))
            .await?;
        parse_feed(&self.name, &resp.body, Utc::now())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
