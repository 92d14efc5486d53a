use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use reviewpulse_common::types::{ReviewItem, SourceId};

use super::{keep_text, Collector};

const HN_API: &str = "https://hn.algolia.com/api/v1";

/// Searches Hacker News via the Algolia API, both stories and comments.
pub struct HackerNewsCollector {
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Deserialize)]
struct Hit {
    #[serde(rename = "objectID")]
    object_id: String,
    title: Option<String>,
    story_text: Option<String>,
    comment_text: Option<String>,
    points: Option<i64>,
    author: Option<String>,
    created_at: Option<String>,
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("valid regex"))
}

/// Algolia returns comment bodies as HTML fragments.
fn strip_tags(text: &str) -> String {
    tag_re().replace_all(text, " ").replace("&#x27;", "'")
}

impl HackerNewsCollector {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }

    async fn search(&self, query: &str, tags: &str, limit: u32) -> Result<Vec<ReviewItem>> {
        let url = format!("{HN_API}/search");
        let response = self
            .http
            .get(&url)
            .query(&[
                ("query", query),
                ("tags", tags),
                ("hitsPerPage", &limit.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let parsed: SearchResponse = response.json().await?;
        let mut items = Vec::new();
        for hit in parsed.hits {
            let text = match (&hit.title, &hit.story_text, &hit.comment_text) {
                (Some(title), Some(body), _) => format!("{}\n\n{}", title, strip_tags(body)),
                (Some(title), None, None) => title.clone(),
                (_, _, Some(comment)) => strip_tags(comment),
                _ => continue,
            };
            if !keep_text(&text) {
                continue;
            }
            items.push(ReviewItem {
                source: SourceId::HackerNews,
                source_key: format!("https://news.ycombinator.com/item?id={}", hit.object_id),
                text,
                posted_at: hit.created_at.as_deref().and_then(parse_created_at),
                engagement: hit.points.unwrap_or(0).max(0) as u32,
                author: hit.author,
                platform: "hacker_news".to_string(),
            });
        }
        Ok(items)
    }
}

fn parse_created_at(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
impl Collector for HackerNewsCollector {
    fn source(&self) -> SourceId {
        SourceId::HackerNews
    }

    async fn collect(&self, query: &str, limit: u32) -> Result<Vec<ReviewItem>> {
        let mut items = Vec::new();
        for tags in ["story", "comment"] {
            match self.search(query, tags, limit).await {
                Ok(found) => items.extend(found),
                Err(e) => debug!(tags, error = %e, "HN search failed"),
            }
        }
        items.truncate(limit as usize);
        Ok(items)
    }
}
