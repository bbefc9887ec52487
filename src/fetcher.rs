use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_rs::model::{Entry, FeedType};
use feed_rs::parser::{self, ParseFeedError};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::debug;

use crate::normalize;

const USER_AGENT: &str = "RssReader/1.0 (RSS Aggregator)";

/// One entry as it appears in a fetched feed document, before its date is
/// normalized. The three date fields hold whatever the source provided.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEntry {
    pub title: String,
    pub link: String,
    pub summary: Option<String>,
    /// RSS `pubDate`
    pub pub_date: Option<String>,
    pub published: Option<String>,
    pub updated: Option<String>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP error: {0}")]
    Status(StatusCode),
    #[error("failed to parse feed: {0}")]
    Parse(#[from] ParseFeedError),
}

/// Something that can turn a feed URL into its entries.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Entries are returned in document order.
    async fn fetch(&self, url: &str) -> Result<Vec<RawEntry>, FetchError>;
}

pub struct HttpFeedSource {
    client: Client,
}

impl HttpFeedSource {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, url: &str) -> Result<Vec<RawEntry>, FetchError> {
        debug!("Fetching feed: {}", url);

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status()));
        }
        let bytes = response.bytes().await?;

        parse_entries(&bytes)
    }
}

/// Parse an RSS or Atom document into raw entries.
///
/// Entry timestamps keep the wall-clock time written in the document; a
/// trailing offset is dropped, not applied.
pub fn parse_entries(bytes: &[u8]) -> Result<Vec<RawEntry>, FetchError> {
    let feed = parser::Builder::new()
        .timestamp_parser(wall_clock_timestamp)
        .build()
        .parse(bytes)?;
    let is_rss = matches!(
        feed.feed_type,
        FeedType::RSS0 | FeedType::RSS1 | FeedType::RSS2
    );

    Ok(feed
        .entries
        .into_iter()
        .map(|entry| raw_entry(entry, is_rss))
        .collect())
}

// feed-rs stores `DateTime<Utc>`, so the naive time is carried as if it were UTC
fn wall_clock_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    normalize::parse_date(raw).map(|naive| naive.and_utc())
}

fn raw_entry(entry: Entry, is_rss: bool) -> RawEntry {
    let title = entry.title.map(|t| t.content).unwrap_or_default();
    let link = entry
        .links
        .into_iter()
        .next()
        .map(|l| l.href)
        .unwrap_or_default();
    let summary = entry.summary.map(|s| s.content);

    // feed-rs folds RSS pubDate and Atom <published> into one field
    let published = entry.published.map(|dt| dt.to_rfc3339());
    let (pub_date, published) = if is_rss {
        (published, None)
    } else {
        (None, published)
    };

    RawEntry {
        title,
        link,
        summary,
        pub_date,
        published,
        updated: entry.updated.map(|dt| dt.to_rfc3339()),
    }
}
