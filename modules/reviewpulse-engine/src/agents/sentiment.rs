use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use ai_client::Claude;
use reviewpulse_common::scoring::{aggregate_sentiment, aspect_breakdown};
use reviewpulse_common::types::{ClassifiedItem, RiskLevel, SentimentReport};

use super::{AgentParams, AgentSection, AnalysisAgent};

/// Weighted sentiment score, aspect breakdown, and a market-position summary.
/// The numbers are computed locally; the LLM only writes the prose.
pub struct SentimentAgent {
    ai: Option<Claude>,
}

impl SentimentAgent {
    pub fn new(ai: Option<Claude>) -> Self {
        Self { ai }
    }
}

fn risk_level_for(score: f64) -> RiskLevel {
    if score >= 6.0 {
        RiskLevel::Low
    } else if score >= 4.5 {
        RiskLevel::Moderate
    } else if score >= 3.0 {
        RiskLevel::Significant
    } else {
        RiskLevel::Critical
    }
}

fn fallback_summary(product: &str, score: f64, positive: f64, negative: f64, total: u32) -> String {
    format!(
        "{product} scores {score:.1}/10 across {total} weighted feedback items \
({positive:.0}% positive, {negative:.0}% negative)."
    )
}

#[async_trait]
impl AnalysisAgent for SentimentAgent {
    fn name(&self) -> &'static str {
        "sentiment"
    }

    async fn run(&self, items: &[ClassifiedItem], params: &AgentParams) -> Result<AgentSection> {
        let agg = aggregate_sentiment(items);
        let aspects = aspect_breakdown(items);

        let fallback = fallback_summary(
            &params.product_name,
            agg.weighted_score,
            agg.positive_pct,
            agg.negative_pct,
            agg.total,
        );

        let market_position = match &self.ai {
            Some(ai) => {
                let sample: String = items
                    .iter()
                    .take(20)
                    .map(|i| format!("[{}] {}", i.sentiment, i.item.text.chars().take(200).collect::<String>()))
                    .collect::<Vec<_>>()
                    .join("\n");
                let prompt = format!(
                    "Product: {}\nCalculated sentiment score: {:.1}/10\n\
Positive: {:.0}%  Negative: {:.0}%  Total items: {}\n\nSample feedback:\n{}\n\n\
Write a three-sentence professional market-position summary of this product's health.",
                    params.product_name,
                    agg.weighted_score,
                    agg.positive_pct,
                    agg.negative_pct,
                    agg.total,
                    sample
                );
                match ai
                    .chat_completion("You are a market analyst.", prompt)
                    .await
                {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "Sentiment prose generation failed, using fallback");
                        fallback
                    }
                }
            }
            None => fallback,
        };

        Ok(AgentSection::Sentiment(SentimentReport {
            weighted_score: agg.weighted_score,
            overall_label: agg.overall_label,
            positive_pct: agg.positive_pct,
            neutral_pct: agg.neutral_pct,
            negative_pct: agg.negative_pct,
            total: agg.total,
            aspects,
            market_position,
            revenue_risk_level: risk_level_for(agg.weighted_score),
        }))
    }
}
