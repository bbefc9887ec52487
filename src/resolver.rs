use std::collections::HashSet;

use crate::db::{Database, Feed};

/// Parse a comma-separated `category` query value into names.
pub fn split_categories(raw: &str) -> Vec<String> {
    raw.split(',').map(str::to_string).collect()
}

/// Turn request filters into the feeds to aggregate.
///
/// A feed id takes precedence over category names when both are given; an
/// unknown id resolves to no feeds. Category names are OR-ed together, and
/// without any filter every stored feed is returned.
pub async fn resolve(
    db: &Database,
    categories: Option<&[String]>,
    feed_id: Option<i64>,
) -> anyhow::Result<Vec<Feed>> {
    if let Some(feed_id) = feed_id {
        return Ok(db.get_feed(feed_id).await?.into_iter().collect());
    }

    match categories {
        Some(names) => feeds_in_any_category(db, names).await,
        None => db.list_feeds().await,
    }
}

/// Union of the feeds tagged with each name, in first-seen order.
///
/// Unknown names contribute nothing.
pub async fn feeds_in_any_category(db: &Database, names: &[String]) -> anyhow::Result<Vec<Feed>> {
    let mut seen = HashSet::new();
    let mut feeds = Vec::new();

    for name in names {
        for feed in db.feeds_in_category(name).await? {
            if seen.insert(feed.id) {
                feeds.push(feed);
            }
        }
    }

    Ok(feeds)
}
