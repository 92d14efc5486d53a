use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use ai_client::Claude;
use reviewpulse_common::scoring::{
    churn_keywords_in, detect_aspects, estimated_monthly_price, financial_impact, month_bucket,
    revenue_risk, severity_score, sort_churn_events,
};
use reviewpulse_common::types::{
    Aspect, ChurnRiskEvent, ClassifiedItem, RiskCategory, RiskReport, SentimentLabel,
    TimelineBucket,
};

use super::{AgentParams, AgentSection, AnalysisAgent};

/// Churn-signal detection and revenue-risk estimation. All money math is
/// deterministic; the LLM tier only writes the two-sentence summary.
pub struct RiskAgent {
    ai: Option<Claude>,
}

impl RiskAgent {
    pub fn new(ai: Option<Claude>) -> Self {
        Self { ai }
    }
}

fn risk_category(aspect: Aspect) -> RiskCategory {
    match aspect {
        Aspect::Pricing => RiskCategory::Pricing,
        Aspect::Performance | Aspect::Reliability => RiskCategory::Bugs,
        Aspect::Support => RiskCategory::Support,
        Aspect::Features | Aspect::Ux => RiskCategory::Features,
    }
}

fn item_weight(item: &ClassifiedItem) -> f64 {
    item.quality * item.sentiment_confidence
}

fn item_categories(item: &ClassifiedItem) -> Vec<RiskCategory> {
    let mut categories: Vec<RiskCategory> = detect_aspects(&item.item.text)
        .into_iter()
        .map(risk_category)
        .collect();
    categories.sort();
    categories.dedup();
    categories
}

/// Build per-(category, month) churn events. Severity is the weighted share
/// of negative sentiment within the bucket; the revenue figure is exactly
/// `severity * monthly_price`.
fn build_events(items: &[ClassifiedItem], monthly_price: f64) -> Vec<ChurnRiskEvent> {
    // BTreeMap keys keep bucket iteration deterministic.
    let mut buckets: BTreeMap<(RiskCategory, String), BucketAccumulator> = BTreeMap::new();

    for item in items {
        let Some(at) = item.item.first_seen else {
            continue;
        };
        let month = month_bucket(at);
        for category in item_categories(item) {
            let acc = buckets.entry((category, month.clone())).or_default();
            acc.total_weight += item_weight(item);
            if item.sentiment == SentimentLabel::Negative {
                acc.negative_weight += item_weight(item);
                acc.negative_count += 1;
            }
            acc.earliest = Some(match acc.earliest {
                Some(prev) if prev <= at => prev,
                _ => at,
            });
        }
    }

    let mut events = Vec::new();
    for ((category, _month), acc) in buckets {
        if acc.negative_count == 0 {
            continue;
        }
        let severity = severity_score(acc.negative_weight, acc.total_weight);
        events.push(ChurnRiskEvent {
            category,
            severity,
            monthly_revenue_at_risk: revenue_risk(severity, monthly_price),
            occurred_at: acc.earliest.expect("bucket has at least one item"),
        });
    }
    sort_churn_events(&mut events);
    events
}

#[derive(Default)]
struct BucketAccumulator {
    total_weight: f64,
    negative_weight: f64,
    negative_count: u32,
    earliest: Option<DateTime<Utc>>,
}

/// Incident frequency per calendar month, chronological.
fn build_timeline(items: &[ClassifiedItem]) -> Vec<TimelineBucket> {
    let mut months: BTreeMap<String, (u32, u32, u32)> = BTreeMap::new();
    for item in items {
        let Some(at) = item.item.first_seen else {
            continue;
        };
        let entry = months.entry(month_bucket(at)).or_default();
        match item.sentiment {
            SentimentLabel::Positive => entry.0 += 1,
            SentimentLabel::Neutral => entry.1 += 1,
            SentimentLabel::Negative => entry.2 += 1,
        }
    }
    months
        .into_iter()
        .map(|(period, (pos, neu, neg))| {
            let dominant = if neg >= pos && neg >= neu {
                SentimentLabel::Negative
            } else if pos >= neu {
                SentimentLabel::Positive
            } else {
                SentimentLabel::Neutral
            };
            TimelineBucket {
                period,
                incident_count: neg,
                dominant_sentiment: dominant,
            }
        })
        .collect()
}

#[async_trait]
impl AnalysisAgent for RiskAgent {
    fn name(&self) -> &'static str {
        "risk"
    }

    async fn run(&self, items: &[ClassifiedItem], params: &AgentParams) -> Result<AgentSection> {
        let churn_signals: Vec<&ClassifiedItem> = items
            .iter()
            .filter(|i| !churn_keywords_in(&i.item.text).is_empty())
            .collect();
        let churn_signal_count = churn_signals.len() as u32;
        let total = items.len();
        let churn_rate_pct = if total > 0 {
            churn_signal_count as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        let monthly_price = estimated_monthly_price(params.arpu, params.default_monthly_price);
        let churn_events = build_events(items, monthly_price);
        let timeline = build_timeline(items);

        let impact = match (params.mau, params.arpu) {
            (Some(mau), Some(arpu)) => {
                let avg_quality = if churn_signals.is_empty() {
                    0.0
                } else {
                    churn_signals.iter().map(|i| i.quality).sum::<f64>()
                        / churn_signals.len() as f64
                };
                Some(financial_impact(mau, arpu, churn_rate_pct, avg_quality))
            }
            _ => None,
        };

        let fallback_summary = format!(
            "Detected {churn_signal_count} explicit churn signals in {total} items \
({churn_rate_pct:.1}% churn-signal rate) across {} risk categories.",
            churn_events.len()
        );
        let summary = match &self.ai {
            Some(ai) => {
                let context: String = churn_signals
                    .iter()
                    .take(20)
                    .map(|i| format!("- {}", i.item.text.chars().take(200).collect::<String>()))
                    .collect::<Vec<_>>()
                    .join("\n");
                let prompt = format!(
                    "Product: {}\nChurn signal rate: {churn_rate_pct:.1}% of analyzed feedback.\n\
Explicit churn signals:\n{}\n\nWrite a two-sentence churn-risk assessment.",
                    params.product_name,
                    if context.is_empty() {
                        "(none detected)"
                    } else {
                        context.as_str()
                    }
                );
                match ai.chat_completion("You are a revenue-risk analyst.", prompt).await {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "Risk summary generation failed, using fallback");
                        fallback_summary
                    }
                }
            }
            None => fallback_summary,
        };

        Ok(AgentSection::Risk(RiskReport {
            churn_events,
            timeline,
            estimated_monthly_price: monthly_price,
            financial_impact: impact,
            churn_signal_count,
            churn_rate_pct,
            summary,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{classified_at, params};
    use super::*;
    use chrono::TimeZone;

    fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn events_round_trip_severity_times_price() {
        let agent = RiskAgent::new(None);
        let items = vec![
            classified_at(
                "cancelled over the pricing, it got expensive fast",
                SentimentLabel::Negative,
                0.9,
                Some(at(2026, 3, 2)),
            ),
            classified_at(
                "pricing is fair for what it does",
                SentimentLabel::Positive,
                0.6,
                Some(at(2026, 3, 9)),
            ),
        ];
        let AgentSection::Risk(report) = agent.run(&items, &params()).await.unwrap() else {
            panic!("wrong section");
        };
        assert!(!report.churn_events.is_empty());
        for event in &report.churn_events {
            assert_eq!(
                event.monthly_revenue_at_risk,
                event.severity * report.estimated_monthly_price
            );
            assert!(event.severity > 0.0 && event.severity < 1.0);
        }
    }

    #[tokio::test]
    async fn arpu_overrides_default_price() {
        let agent = RiskAgent::new(None);
        let mut p = params();
        p.arpu = Some(12.5);
        p.mau = Some(1_000);
        let items = vec![classified_at(
            "switching away, too many crash bugs",
            SentimentLabel::Negative,
            0.8,
            Some(at(2026, 4, 1)),
        )];
        let AgentSection::Risk(report) = agent.run(&items, &p).await.unwrap() else {
            panic!("wrong section");
        };
        assert_eq!(report.estimated_monthly_price, 12.5);
        let impact = report.financial_impact.expect("calibrated");
        assert_eq!(impact.annual_revenue_at_risk, impact.monthly_revenue_at_risk * 12.0);
        assert_eq!(report.churn_signal_count, 1);
        assert_eq!(report.churn_rate_pct, 100.0);
    }

    #[tokio::test]
    async fn timeline_is_chronological() {
        let agent = RiskAgent::new(None);
        let items = vec![
            classified_at("crash on save", SentimentLabel::Negative, 0.7, Some(at(2026, 5, 1))),
            classified_at("another crash here", SentimentLabel::Negative, 0.7, Some(at(2026, 2, 1))),
            classified_at("crash while syncing", SentimentLabel::Negative, 0.7, Some(at(2026, 2, 20))),
        ];
        let AgentSection::Risk(report) = agent.run(&items, &params()).await.unwrap() else {
            panic!("wrong section");
        };
        let periods: Vec<&str> = report.timeline.iter().map(|b| b.period.as_str()).collect();
        assert_eq!(periods, vec!["2026-02", "2026-05"]);
        assert_eq!(report.timeline[0].incident_count, 2);
        assert_eq!(report.timeline[0].dominant_sentiment, SentimentLabel::Negative);
    }

    #[tokio::test]
    async fn undated_items_count_toward_rate_but_not_timeline() {
        let agent = RiskAgent::new(None);
        let items = vec![classified_at(
            "thinking about cancelling",
            SentimentLabel::Negative,
            0.5,
            None,
        )];
        let AgentSection::Risk(report) = agent.run(&items, &params()).await.unwrap() else {
            panic!("wrong section");
        };
        assert_eq!(report.churn_signal_count, 1);
        assert!(report.timeline.is_empty());
        assert!(report.churn_events.is_empty());
    }

    #[tokio::test]
    async fn no_financials_without_mau_and_arpu() {
        let agent = RiskAgent::new(None);
        let AgentSection::Risk(report) = agent.run(&[], &params()).await.unwrap() else {
            panic!("wrong section");
        };
        assert!(report.financial_impact.is_none());
        assert_eq!(report.churn_rate_pct, 0.0);
    }
}
