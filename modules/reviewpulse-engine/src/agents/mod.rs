//! Analysis agents. Four independent workers over the classified item set;
//! each produces one section of the AnalysisResult. Scores and money figures
//! are computed deterministically; LLM calls only ever produce prose or
//! candidate labels, with a deterministic fallback on any failure.

pub mod competitor;
pub mod priority;
pub mod risk;
pub mod sentiment;

use anyhow::Result;
use async_trait::async_trait;

use reviewpulse_common::types::{
    AnalysisResult, ClassifiedItem, CompetitorReport, PriorityReport, RiskReport, SentimentReport,
};

pub use competitor::CompetitorAgent;
pub use priority::PriorityAgent;
pub use risk::RiskAgent;
pub use sentiment::SentimentAgent;

pub struct AgentParams {
    pub product_name: String,
    pub mau: Option<i64>,
    pub arpu: Option<f64>,
    pub default_monthly_price: f64,
}

/// One agent's contribution to the result.
pub enum AgentSection {
    Sentiment(SentimentReport),
    Priority(PriorityReport),
    Competitor(CompetitorReport),
    Risk(RiskReport),
}

impl AgentSection {
    pub fn merge_into(self, result: &mut AnalysisResult) {
        match self {
            AgentSection::Sentiment(report) => result.sentiment = Some(report),
            AgentSection::Priority(report) => result.priorities = Some(report),
            AgentSection::Competitor(report) => result.competitors = Some(report),
            AgentSection::Risk(report) => result.risk = Some(report),
        }
    }
}

/// Contract every analysis agent implements. Agents receive only kept
/// (relevance-verified) items; a returned Err isolates to this agent's
/// section and never fails the others.
#[async_trait]
pub trait AnalysisAgent: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, items: &[ClassifiedItem], params: &AgentParams) -> Result<AgentSection>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, Utc};
    use reviewpulse_common::types::{
        CanonicalItem, ItemKey, RelevanceVerdict, SentimentLabel, SourceId,
    };

    use super::*;

    pub fn params() -> AgentParams {
        AgentParams {
            product_name: "Acme Notes".to_string(),
            mau: None,
            arpu: None,
            default_monthly_price: 50.0,
        }
    }

    pub fn classified_at(
        text: &str,
        sentiment: SentimentLabel,
        quality: f64,
        at: Option<DateTime<Utc>>,
    ) -> ClassifiedItem {
        ClassifiedItem {
            item: CanonicalItem {
                text: text.to_string(),
                source: SourceId::Reddit,
                engagement: 1,
                members: vec![ItemKey {
                    source: SourceId::Reddit,
                    source_key: format!("key-{}", text.len()),
                }],
                cluster_confidence: 1.0,
                first_seen: at,
            },
            verdict: RelevanceVerdict::Kept,
            sentiment,
            sentiment_confidence: 0.8,
            quality,
        }
    }

    pub fn classified(text: &str, sentiment: SentimentLabel, quality: f64) -> ClassifiedItem {
        classified_at(text, sentiment, quality, None)
    }
}
