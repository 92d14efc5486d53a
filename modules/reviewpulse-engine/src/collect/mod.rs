//! Collection adapters. Each wraps one external feedback source behind the
//! same narrow contract; the orchestrator fans out across all of them.

pub mod hackernews;
pub mod reddit;
pub mod websearch;

use anyhow::Result;
use async_trait::async_trait;

use reviewpulse_common::types::{ReviewItem, SourceId};

pub use hackernews::HackerNewsCollector;
pub use reddit::RedditCollector;
pub use websearch::WebSearchCollector;

/// One feedback source. `collect` returning an empty Vec is a valid success
/// (zero matches) and is distinct from an Err.
#[async_trait]
pub trait Collector: Send + Sync {
    fn source(&self) -> SourceId;

    async fn collect(&self, query: &str, limit: u32) -> Result<Vec<ReviewItem>>;
}

/// Drop items too short to carry any signal before they enter the pipeline.
pub(crate) const MIN_TEXT_CHARS: usize = 30;

pub(crate) fn keep_text(text: &str) -> bool {
    text.trim().chars().count() >= MIN_TEXT_CHARS
}
