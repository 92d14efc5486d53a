use std::collections::HashMap;
use std::sync::OnceLock;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::warn;

use ai_client::Claude;
use reviewpulse_common::types::{ClassifiedItem, CompetitorReport, DataQuality};

use super::{AgentParams, AgentSection, AnalysisAgent};

/// Surfaces competitors named in the feedback and benchmarks against the
/// strongest one. The discovered-competitor list is regex-derived and always
/// available; the benchmark scores come from the LLM tier when configured.
pub struct CompetitorAgent {
    ai: Option<Claude>,
}

impl CompetitorAgent {
    pub fn new(ai: Option<Claude>) -> Self {
        Self { ai }
    }
}

fn switch_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\b(?:[Ss]witch(?:ed|ing)?|[Mm]ov(?:ed|ing)|[Mm]igrat(?:ed|ing))\s+(?:over\s+)?to\s+([A-Z][A-Za-z0-9._-]{1,24})",
        )
        .expect("valid regex")
    })
}

/// Competitor names mentioned as switch targets, most-mentioned first,
/// ties broken alphabetically.
pub(crate) fn discover_competitors(items: &[ClassifiedItem]) -> Vec<String> {
    let mut counts: HashMap<String, u32> = HashMap::new();
    for item in items {
        for capture in switch_re().captures_iter(&item.item.text) {
            let name = capture[1].trim_end_matches(['.', ',']).to_string();
            *counts.entry(name).or_insert(0) += 1;
        }
    }
    let mut names: Vec<(String, u32)> = counts.into_iter().collect();
    names.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    names.into_iter().map(|(name, _)| name).collect()
}

const FALLBACK_METRICS: [&str; 5] = ["Performance", "Value", "Reliability", "Ease of Use", "Support"];

fn fallback_report(discovered: Vec<String>) -> CompetitorReport {
    let competitor_name = discovered
        .first()
        .cloned()
        .unwrap_or_else(|| "Market Leader".to_string());
    CompetitorReport {
        competitor_name,
        metrics: FALLBACK_METRICS.iter().map(|m| m.to_string()).collect(),
        our_scores: vec![5; 5],
        competitor_scores: vec![5; 5],
        data_quality: DataQuality::LowConfidence,
        key_differentiators: vec!["Insufficient comparison data gathered.".to_string()],
        discovered,
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CompetitorBenchmark {
    /// The single biggest rival, named in the feedback or inferred.
    competitor_name: String,
    /// Exactly 5 distinct metrics relevant to the product category.
    metrics: Vec<String>,
    /// 1-10, index-aligned with `metrics`.
    our_scores: Vec<u8>,
    /// 1-10, index-aligned with `metrics`.
    competitor_scores: Vec<u8>,
    data_quality: DataQuality,
    /// 2-3 features that separate the products.
    key_differentiators: Vec<String>,
}

const COMPETITOR_SYSTEM_PROMPT: &str = "You are a product strategy consultant performing a \
competitive benchmark from user feedback. Identify the primary competitor (prefer one users \
actually name), pick 5 metrics relevant to the product's category, and score both products 1-10 \
on each metric based only on the provided evidence. State your data quality honestly.";

#[async_trait]
impl AnalysisAgent for CompetitorAgent {
    fn name(&self) -> &'static str {
        "competitor"
    }

    async fn run(&self, items: &[ClassifiedItem], params: &AgentParams) -> Result<AgentSection> {
        let discovered = discover_competitors(items);

        let report = match &self.ai {
            Some(ai) => {
                let sample: String = items
                    .iter()
                    .take(15)
                    .map(|i| i.item.text.chars().take(300).collect::<String>())
                    .collect::<Vec<_>>()
                    .join("\n---\n");
                let prompt = format!(
                    "Product: {}\nCompetitors users mention: {}\n\nUser feedback:\n{}",
                    params.product_name,
                    if discovered.is_empty() {
                        "(none named)".to_string()
                    } else {
                        discovered.join(", ")
                    },
                    sample
                );
                match ai
                    .extract::<CompetitorBenchmark>(COMPETITOR_SYSTEM_PROMPT, prompt)
                    .await
                {
                    Ok(benchmark)
                        if benchmark.metrics.len() >= 3
                            && benchmark.metrics.len() == benchmark.our_scores.len()
                            && benchmark.metrics.len() == benchmark.competitor_scores.len() =>
                    {
                        CompetitorReport {
                            competitor_name: benchmark.competitor_name,
                            metrics: benchmark.metrics,
                            our_scores: benchmark.our_scores,
                            competitor_scores: benchmark.competitor_scores,
                            data_quality: benchmark.data_quality,
                            key_differentiators: benchmark.key_differentiators,
                            discovered,
                        }
                    }
                    Ok(_) => {
                        warn!("Benchmark arrays misaligned, using fallback report");
                        fallback_report(discovered)
                    }
                    Err(e) => {
                        warn!(error = %e, "Competitor benchmark failed, using fallback report");
                        fallback_report(discovered)
                    }
                }
            }
            None => fallback_report(discovered),
        };

        Ok(AgentSection::Competitor(report))
    }
}
