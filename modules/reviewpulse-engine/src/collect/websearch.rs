use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use reviewpulse_common::types::{ReviewItem, SourceId};

use super::{keep_text, Collector};

const SEARCH_URL: &str = "https://google.serper.dev/search";

/// Web search collector (Serper). Surfaces review-site and blog feedback the
/// platform-specific collectors miss.
pub struct WebSearchCollector {
    http: reqwest::Client,
    api_key: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    organic: Vec<OrganicResult>,
}

#[derive(Deserialize)]
struct OrganicResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
}

impl WebSearchCollector {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
        }
    }
}

fn domain_of(link: &str) -> String {
    url::Url::parse(link)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_default()
}

#[async_trait]
impl Collector for WebSearchCollector {
    fn source(&self) -> SourceId {
        SourceId::WebSearch
    }

    async fn collect(&self, query: &str, limit: u32) -> Result<Vec<ReviewItem>> {
        let response = self
            .http
            .post(SEARCH_URL)
            .header("X-API-KEY", &self.api_key)
            .json(&serde_json::json!({
                "q": format!("{query} user reviews complaints"),
                "num": limit,
            }))
            .send()
            .await?
            .error_for_status()?;

        let parsed: SearchResponse = response.json().await?;
        let mut items = Vec::new();
        for result in parsed.organic {
            let text = format!("{}\n\n{}", result.title, result.snippet);
            if !keep_text(&text) {
                continue;
            }
            items.push(ReviewItem {
                source: SourceId::WebSearch,
                source_key: result.link.clone(),
                text,
                posted_at: None,
                engagement: 0,
                author: None,
                platform: domain_of(&result.link),
            });
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn organic_results_map_to_items() {
        let raw = serde_json::json!({
            "organic": [
                { "title": "Acme Notes review: six months in",
                  "link": "https://example-reviews.com/acme-notes",
                  "snippet": "The editor is excellent but sync conflicts ate a week of notes." }
            ]
        });
        let parsed: SearchResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.organic.len(), 1);
        assert_eq!(domain_of(&parsed.organic[0].link), "example-reviews.com");
    }

    #[test]
    fn bad_links_yield_empty_domain() {
        assert_eq!(domain_of("not a url"), "");
    }
}
