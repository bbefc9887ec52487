use std::sync::Arc;

use chrono::NaiveDateTime;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::db::Feed;
use crate::fetcher::{FeedSource, RawEntry};
use crate::normalize::normalize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Article {
    pub title: String,
    pub link: String,
    pub date: NaiveDateTime,
    pub summary: Option<String>,
    pub feed_name: String,
    pub categories: Vec<String>,
}

/// Merges recent entries from many feeds into one newest-first list.
pub struct Aggregator {
    source: Arc<dyn FeedSource>,
    concurrency: usize,
}

impl Aggregator {
    pub fn new(source: Arc<dyn FeedSource>, concurrency: usize) -> Self {
        Self {
            source,
            concurrency: concurrency.max(1),
        }
    }

    /// Collect at most `limit` articles from the visible feeds, newest first.
    ///
    /// Each feed contributes at most its first `limit` entries (in document
    /// order) before the merge, so a feed with many recent entries can be
    /// under-represented when several feeds are merged. Articles with equal
    /// dates keep feed order, then entry order.
    ///
    /// Feeds that fail to fetch and entries without a usable date are
    /// skipped.
    pub async fn aggregate(&self, feeds: &[Feed], limit: i64) -> Vec<Article> {
        if limit <= 0 {
            return Vec::new();
        }
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);

        let visible: Vec<Feed> = feeds.iter().filter(|f| f.is_visible).cloned().collect();

        // `buffered` yields in input order whatever order fetches finish in
        let per_feed: Vec<Vec<Article>> = stream::iter(visible)
            .map(|feed| collect_feed(Arc::clone(&self.source), feed, limit))
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut articles: Vec<Article> = per_feed.into_iter().flatten().collect();
        // Stable sort keeps concatenation order for equal dates
        articles.sort_by(|a, b| b.date.cmp(&a.date));
        articles.truncate(limit);

        info!(
            "Aggregated {} articles from {} feeds",
            articles.len(),
            feeds.len()
        );
        articles
    }
}

async fn collect_feed(source: Arc<dyn FeedSource>, feed: Feed, limit: usize) -> Vec<Article> {
    let entries = match source.fetch(&feed.url).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to fetch feed '{}': {}", feed.name, e);
            return Vec::new();
        }
    };

    entries
        .into_iter()
        .take(limit)
        .filter_map(|entry| build_article(&feed, entry))
        .collect()
}

fn build_article(feed: &Feed, entry: RawEntry) -> Option<Article> {
    let date = match normalize(&entry) {
        Ok(date) => date,
        Err(e) => {
            debug!("Skipping entry '{}' from '{}': {}", entry.title, feed.name, e);
            return None;
        }
    };

    Some(Article {
        title: entry.title,
        link: entry.link,
        date,
        summary: entry.summary,
        feed_name: feed.name.clone(),
        categories: feed.categories.clone(),
    })
}
