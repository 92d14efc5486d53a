use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::warn;

use ai_client::Claude;
use reviewpulse_common::scoring::{detect_aspects, rank_priorities};
use reviewpulse_common::types::{
    Aspect, ClassifiedItem, PriorityItem, PriorityReport, SentimentLabel, TechnicalGap,
};

use super::{AgentParams, AgentSection, AnalysisAgent};

/// Ranks candidate gaps by ICE score. Candidates come from the LLM when one
/// is configured, otherwise from aspect-bucketed negative feedback; the
/// scoring and ranking are always local.
pub struct PriorityAgent {
    ai: Option<Claude>,
}

impl PriorityAgent {
    pub fn new(ai: Option<Claude>) -> Self {
        Self { ai }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct GapAnalysis {
    /// Candidate issues, each scored 1-10 on the three ICE factors.
    gaps: Vec<GapCandidate>,
    #[serde(default)]
    technical_gaps: Vec<TechnicalGap>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct GapCandidate {
    gap: String,
    /// 1-10: how many users this hurts and how badly.
    impact: u8,
    /// 1-10: how strongly the feedback supports this being real.
    confidence: u8,
    /// 1-10: how easy a fix looks.
    ease: u8,
    evidence_quote: Option<String>,
}

const PRIORITY_SYSTEM_PROMPT: &str = "You are a product manager analyzing negative user feedback. \
Identify the distinct underlying issues, score each 1-10 for impact (how many users it hurts and \
how badly), confidence (how strongly the feedback supports it), and ease (how simple a fix looks), \
and quote one short piece of supporting evidence per issue. Also list any purely technical gaps \
with their business impact and a one-line suggested fix.";

/// Earliest sighting of a gap: the first negative item sharing a
/// content word with the gap description.
fn first_mention(gap: &str, negatives: &[&ClassifiedItem]) -> Option<DateTime<Utc>> {
    let words: Vec<String> = gap
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 3)
        .map(|w| w.to_string())
        .collect();
    negatives
        .iter()
        .filter(|item| {
            let lower = item.item.text.to_lowercase();
            words.iter().any(|w| lower.contains(w))
        })
        .filter_map(|item| item.item.first_seen)
        .min()
}

/// Rule-derived candidates: one per aspect with negative mentions.
fn fallback_candidates(items: &[ClassifiedItem]) -> Vec<PriorityItem> {
    let negatives: Vec<&ClassifiedItem> = items
        .iter()
        .filter(|i| i.sentiment == SentimentLabel::Negative)
        .collect();
    let total = items.len().max(1);

    let ease_for = |aspect: Aspect| -> u8 {
        match aspect {
            Aspect::Ux => 7,
            Aspect::Pricing => 6,
            Aspect::Support => 6,
            Aspect::Features => 5,
            Aspect::Performance => 4,
            Aspect::Reliability => 3,
        }
    };

    let mut candidates = Vec::new();
    for aspect in Aspect::all() {
        let hits: Vec<&&ClassifiedItem> = negatives
            .iter()
            .filter(|i| detect_aspects(&i.item.text).contains(&aspect))
            .collect();
        if hits.is_empty() {
            continue;
        }
        let share = hits.len() as f64 / total as f64;
        let impact = ((share * 10.0).ceil() as u8).clamp(1, 10);
        let avg_quality = hits.iter().map(|i| i.quality).sum::<f64>() / hits.len() as f64;
        let confidence = ((avg_quality * 10.0).round() as u8).clamp(1, 10);
        let evidence = hits[0].item.text.chars().take(140).collect::<String>();
        let first_mentioned = hits.iter().filter_map(|i| i.item.first_seen).min();
        candidates.push(PriorityItem {
            gap: format!("Recurring {aspect} complaints"),
            impact,
            confidence,
            ease: ease_for(aspect),
            ice_score: 0,
            rank: 0,
            evidence_quote: Some(evidence),
            first_mentioned,
        });
    }
    candidates
}

#[async_trait]
impl AnalysisAgent for PriorityAgent {
    fn name(&self) -> &'static str {
        "priority"
    }

    async fn run(&self, items: &[ClassifiedItem], params: &AgentParams) -> Result<AgentSection> {
        let negatives: Vec<&ClassifiedItem> = items
            .iter()
            .filter(|i| i.sentiment == SentimentLabel::Negative)
            .collect();

        let (candidates, technical_gaps) = match &self.ai {
            Some(ai) if !negatives.is_empty() => {
                let context: String = negatives
                    .iter()
                    .map(|i| {
                        format!(
                            "[q:{:.2}|weight:{}] {}",
                            i.quality,
                            i.item.engagement,
                            i.item.text.chars().take(300).collect::<String>()
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                let prompt = format!(
                    "Product: {}\n\nNegative feedback:\n{}",
                    params.product_name, context
                );
                match ai.extract::<GapAnalysis>(PRIORITY_SYSTEM_PROMPT, prompt).await {
                    Ok(analysis) => {
                        let candidates = analysis
                            .gaps
                            .into_iter()
                            .map(|g| PriorityItem {
                                first_mentioned: first_mention(&g.gap, &negatives),
                                gap: g.gap,
                                impact: g.impact,
                                confidence: g.confidence,
                                ease: g.ease,
                                ice_score: 0,
                                rank: 0,
                                evidence_quote: g.evidence_quote,
                            })
                            .collect();
                        (candidates, analysis.technical_gaps)
                    }
                    Err(e) => {
                        warn!(error = %e, "Gap extraction failed, deriving candidates from aspects");
                        (fallback_candidates(items), Vec::new())
                    }
                }
            }
            _ => (fallback_candidates(items), Vec::new()),
        };

        Ok(AgentSection::Priority(PriorityReport {
            items: rank_priorities(candidates),
            technical_gaps,
        }))
    }
}
