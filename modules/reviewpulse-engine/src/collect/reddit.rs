use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::debug;

use reviewpulse_common::types::{ReviewItem, SourceId};

use super::{keep_text, Collector};

const SEARCH_URL: &str = "https://www.reddit.com/search.json";

/// Searches Reddit's public JSON endpoint across a few query angles
/// (reviews, problems, alternatives) and maps posts to ReviewItems.
pub struct RedditCollector {
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Deserialize)]
struct Child {
    data: Post,
}

#[derive(Deserialize)]
struct Post {
    #[serde(default)]
    title: String,
    #[serde(default)]
    selftext: String,
    #[serde(default)]
    permalink: String,
    #[serde(default)]
    ups: i64,
    #[serde(default)]
    created_utc: f64,
    author: Option<String>,
    #[serde(default)]
    subreddit: String,
}

impl RedditCollector {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .user_agent("reviewpulse/0.1")
                .build()
                .unwrap_or_default(),
        }
    }

    async fn search(&self, term: &str, limit: u32) -> Result<Vec<ReviewItem>> {
        let response = self
            .http
            .get(SEARCH_URL)
            .query(&[
                ("q", term),
                ("sort", "relevance"),
                ("t", "year"),
                ("limit", &limit.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let listing: Listing = response.json().await?;
        let mut items = Vec::new();
        for child in listing.data.children {
            let post = child.data;
            let text = if post.selftext.trim().is_empty() {
                post.title.clone()
            } else {
                format!("{}\n\n{}", post.title, post.selftext)
            };
            if !keep_text(&text) {
                continue;
            }
            items.push(ReviewItem {
                source: SourceId::Reddit,
                source_key: format!("https://www.reddit.com{}", post.permalink),
                text,
                posted_at: parse_created(post.created_utc),
                engagement: post.ups.max(0) as u32,
                author: post.author,
                platform: format!("r/{}", post.subreddit),
            });
        }
        Ok(items)
    }
}

fn parse_created(created_utc: f64) -> Option<DateTime<Utc>> {
    if created_utc <= 0.0 {
        return None;
    }
    Utc.timestamp_opt(created_utc as i64, 0).single()
}

#[async_trait]
impl Collector for RedditCollector {
    fn source(&self) -> SourceId {
        SourceId::Reddit
    }

    async fn collect(&self, query: &str, limit: u32) -> Result<Vec<ReviewItem>> {
        let terms = [
            format!("{query} review"),
            format!("{query} problems"),
            format!("{query} alternatives"),
        ];
        let per_term = (limit / terms.len() as u32).max(1);

        let mut items = Vec::new();
        for term in &terms {
            match self.search(term, per_term).await {
                Ok(found) => items.extend(found),
                // One term failing is not a source failure; the others may
                // still return results.
                Err(e) => debug!(term, error = %e, "Reddit search term failed"),
            }
        }
        items.truncate(limit as usize);
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_parses_and_maps() {
        let raw = serde_json::json!({
            "data": { "children": [
                { "data": {
                    "title": "Is Acme Notes worth it?",
                    "selftext": "Been using it for a month, sync is flaky but search is great.",
                    "permalink": "/r/productivity/comments/abc/acme/",
                    "ups": 42,
                    "created_utc": 1760000000.0,
                    "author": "someone",
                    "subreddit": "productivity"
                }}
            ]}
        });
        let listing: Listing = serde_json::from_value(raw).unwrap();
        assert_eq!(listing.data.children.len(), 1);
        let post = &listing.data.children[0].data;
        assert_eq!(post.ups, 42);
        assert!(parse_created(post.created_utc).is_some());
    }

    #[test]
    fn zero_timestamp_is_none() {
        assert_eq!(parse_created(0.0), None);
    }
}
