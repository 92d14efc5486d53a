//! Report assembly. Renders the final AnalysisResult into a markdown
//! artifact under the data directory. Chart/PDF rendering stays behind this
//! seam as an external collaborator.

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use reviewpulse_common::types::{AnalysisResult, ArtifactRef};

/// Root data directory, controlled by `DATA_DIR` env var (default: `"data"`).
pub fn data_dir() -> PathBuf {
    PathBuf::from(std::env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()))
}

/// Produces a persisted artifact from a finished analysis. Implementations
/// must not mutate the result and must be overwrite-safe when called twice
/// for the same job.
#[async_trait]
pub trait ReportAssembler: Send + Sync {
    async fn assemble(
        &self,
        job_id: Uuid,
        product_name: &str,
        result: &AnalysisResult,
    ) -> Result<ArtifactRef>;
}

pub struct MarkdownReportWriter {
    out_dir: PathBuf,
}

impl MarkdownReportWriter {
    pub fn new(out_dir: PathBuf) -> Self {
        Self { out_dir }
    }

    pub fn default_location() -> Self {
        Self::new(data_dir().join("reports"))
    }

    fn render(product_name: &str, result: &AnalysisResult) -> String {
        let mut out = String::new();
        out.push_str(&format!("# Product Intelligence Report: {product_name}\n\n"));

        match &result.sentiment {
            Some(s) => {
                out.push_str("## Sentiment\n\n");
                out.push_str(&format!(
                    "Overall: **{:.1}/10** ({}) across {} items — {:.0}% positive, {:.0}% neutral, {:.0}% negative. Revenue risk level: {:?}.\n\n",
                    s.weighted_score,
                    s.overall_label,
                    s.total,
                    s.positive_pct,
                    s.neutral_pct,
                    s.negative_pct,
                    s.revenue_risk_level,
                ));
                out.push_str(&format!("{}\n\n", s.market_position));
                if !s.aspects.is_empty() {
                    out.push_str("| Aspect | Score | Mentions |\n|---|---|---|\n");
                    for aspect in &s.aspects {
                        out.push_str(&format!(
                            "| {} | {:.1} | {} |\n",
                            aspect.aspect, aspect.score, aspect.mention_count
                        ));
                    }
                    out.push('\n');
                }
            }
            None => out.push_str("## Sentiment\n\n_Section unavailable._\n\n"),
        }

        match &result.priorities {
            Some(p) => {
                out.push_str("## Priorities\n\n");
                if p.items.is_empty() {
                    out.push_str("No gaps surfaced from the analyzed feedback.\n\n");
                } else {
                    out.push_str(
                        "| Rank | Gap | Impact | Confidence | Ease | ICE |\n|---|---|---|---|---|---|\n",
                    );
                    for item in &p.items {
                        out.push_str(&format!(
                            "| {} | {} | {} | {} | {} | {} |\n",
                            item.rank, item.gap, item.impact, item.confidence, item.ease, item.ice_score
                        ));
                    }
                    out.push('\n');
                }
                for gap in &p.technical_gaps {
                    out.push_str(&format!("- **{}** — {} (fix: {})\n", gap.gap, gap.impact, gap.suggested_fix));
                }
                if !p.technical_gaps.is_empty() {
                    out.push('\n');
                }
            }
            None => out.push_str("## Priorities\n\n_Section unavailable._\n\n"),
        }

        match &result.competitors {
            Some(c) => {
                out.push_str("## Competitive Position\n\n");
                out.push_str(&format!(
                    "Benchmarked against **{}** ({:?}).\n\n",
                    c.competitor_name, c.data_quality
                ));
                out.push_str("| Metric | Us | Them |\n|---|---|---|\n");
                for (idx, metric) in c.metrics.iter().enumerate() {
                    out.push_str(&format!(
                        "| {} | {} | {} |\n",
                        metric,
                        c.our_scores.get(idx).copied().unwrap_or(0),
                        c.competitor_scores.get(idx).copied().unwrap_or(0)
                    ));
                }
                out.push('\n');
                if !c.discovered.is_empty() {
                    out.push_str(&format!("Competitors named in feedback: {}.\n\n", c.discovered.join(", ")));
                }
            }
            None => out.push_str("## Competitive Position\n\n_Section unavailable._\n\n"),
        }

        match &result.risk {
            Some(r) => {
                out.push_str("## Revenue Risk\n\n");
                out.push_str(&format!("{}\n\n", r.summary));
                out.push_str(&format!(
                    "Churn signals: {} ({:.1}% of items). Assumed monthly price: ${:.2}.\n\n",
                    r.churn_signal_count, r.churn_rate_pct, r.estimated_monthly_price
                ));
                if let Some(impact) = &r.financial_impact {
                    out.push_str(&format!(
                        "At-risk users: {} — ${:.2}/month (${:.2}/year).\n\n",
                        impact.at_risk_users,
                        impact.monthly_revenue_at_risk,
                        impact.annual_revenue_at_risk
                    ));
                }
                if !r.churn_events.is_empty() {
                    out.push_str("| Category | Severity | Monthly $ at risk | When |\n|---|---|---|---|\n");
                    for event in &r.churn_events {
                        out.push_str(&format!(
                            "| {} | {:.2} | ${:.2} | {} |\n",
                            event.category,
                            event.severity,
                            event.monthly_revenue_at_risk,
                            event.occurred_at.format("%Y-%m-%d")
                        ));
                    }
                    out.push('\n');
                }
            }
            None => out.push_str("## Revenue Risk\n\n_Section unavailable._\n\n"),
        }

        out
    }
}

#[async_trait]
impl ReportAssembler for MarkdownReportWriter {
    async fn assemble(
        &self,
        job_id: Uuid,
        product_name: &str,
        result: &AnalysisResult,
    ) -> Result<ArtifactRef> {
        std::fs::create_dir_all(&self.out_dir)?;
        let path = self.out_dir.join(format!("report_{job_id}.md"));
        std::fs::write(&path, Self::render(product_name, result))?;
        Ok(ArtifactRef {
            path: path.to_string_lossy().into_owned(),
        })
    }
}
