//! Test mocks for the pipeline's trait boundaries: collectors, classifiers,
//! agents, and the report assembler. No network, no database.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use reviewpulse_common::types::{
    AnalysisResult, ArtifactRef, CanonicalItem, ClassifiedItem, Job, JobState, PriorityReport,
    ReviewItem, RiskLevel, RiskReport, SentimentLabel, SentimentReport, SourceId,
};
use reviewpulse_store::JobStore;

use crate::agents::{AgentParams, AgentSection, AnalysisAgent};
use crate::classify::{Classifier, ClassifyContext};
use crate::collect::Collector;
use crate::report::ReportAssembler;

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn review(source: SourceId, key: &str, text: &str, engagement: u32) -> ReviewItem {
    ReviewItem {
        source,
        source_key: key.to_string(),
        text: text.to_string(),
        posted_at: Some(Utc::now()),
        engagement,
        author: None,
        platform: source.to_string(),
    }
}

pub fn make_job(product_name: &str) -> Job {
    Job {
        id: Uuid::new_v4(),
        product_name: product_name.to_string(),
        mau: None,
        arpu: None,
        sources: None,
        state: JobState::Queued,
        progress: 0,
        stage: "Queued".to_string(),
        error: None,
        result: None,
        items: None,
        report_path: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        completed_at: None,
    }
}

// ---------------------------------------------------------------------------
// Collectors
// ---------------------------------------------------------------------------

pub struct StaticCollector {
    pub source: SourceId,
    pub items: Vec<ReviewItem>,
}

#[async_trait]
impl Collector for StaticCollector {
    fn source(&self) -> SourceId {
        self.source
    }

    async fn collect(&self, _query: &str, _limit: u32) -> Result<Vec<ReviewItem>> {
        Ok(self.items.clone())
    }
}

pub struct EmptyCollector {
    pub source: SourceId,
}

#[async_trait]
impl Collector for EmptyCollector {
    fn source(&self) -> SourceId {
        self.source
    }

    async fn collect(&self, _query: &str, _limit: u32) -> Result<Vec<ReviewItem>> {
        Ok(Vec::new())
    }
}

pub struct FailingCollector {
    pub source: SourceId,
}

#[async_trait]
impl Collector for FailingCollector {
    fn source(&self) -> SourceId {
        self.source
    }

    async fn collect(&self, _query: &str, _limit: u32) -> Result<Vec<ReviewItem>> {
        bail!("connection refused")
    }
}

// ---------------------------------------------------------------------------
// Classifiers
// ---------------------------------------------------------------------------

pub struct FailingPrimaryClassifier;

#[async_trait]
impl Classifier for FailingPrimaryClassifier {
    async fn classify(
        &self,
        _items: &[CanonicalItem],
        _ctx: &ClassifyContext,
    ) -> Result<Vec<ClassifiedItem>> {
        bail!("inference endpoint returned 503")
    }
}

/// Primary classifier that flips the job's cancellation flag while running,
/// simulating a user cancelling mid-stage, then classifies normally.
pub struct CancelRequestingClassifier {
    pub store: Arc<dyn JobStore>,
    pub job_id: Uuid,
    pub inner: Arc<dyn Classifier>,
}

#[async_trait]
impl Classifier for CancelRequestingClassifier {
    async fn classify(
        &self,
        items: &[CanonicalItem],
        ctx: &ClassifyContext,
    ) -> Result<Vec<ClassifiedItem>> {
        self.store.request_cancel(self.job_id).await?;
        self.inner.classify(items, ctx).await
    }
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

pub struct FailingAgent {
    pub name: &'static str,
}

#[async_trait]
impl AnalysisAgent for FailingAgent {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn run(&self, _items: &[ClassifiedItem], _params: &AgentParams) -> Result<AgentSection> {
        bail!("agent backend unavailable")
    }
}

pub struct StubAgent {
    pub name: &'static str,
}

#[async_trait]
impl AnalysisAgent for StubAgent {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn run(&self, items: &[ClassifiedItem], _params: &AgentParams) -> Result<AgentSection> {
        match self.name {
            "sentiment" => Ok(AgentSection::Sentiment(SentimentReport {
                weighted_score: 5.0,
                overall_label: SentimentLabel::Neutral,
                positive_pct: 0.0,
                neutral_pct: 100.0,
                negative_pct: 0.0,
                total: items.len() as u32,
                aspects: vec![],
                market_position: "stub".to_string(),
                revenue_risk_level: RiskLevel::Moderate,
            })),
            "priority" => Ok(AgentSection::Priority(PriorityReport {
                items: vec![],
                technical_gaps: vec![],
            })),
            "risk" => Ok(AgentSection::Risk(RiskReport {
                churn_events: vec![],
                timeline: vec![],
                estimated_monthly_price: 50.0,
                financial_impact: None,
                churn_signal_count: 0,
                churn_rate_pct: 0.0,
                summary: "stub".to_string(),
            })),
            other => bail!("no stub section for agent '{other}'"),
        }
    }
}

// ---------------------------------------------------------------------------
// Report assembler
// ---------------------------------------------------------------------------

/// Assembler that produces a virtual artifact reference without touching the
/// filesystem.
pub struct NullAssembler;

#[async_trait]
impl ReportAssembler for NullAssembler {
    async fn assemble(
        &self,
        job_id: Uuid,
        _product_name: &str,
        _result: &AnalysisResult,
    ) -> Result<ArtifactRef> {
        Ok(ArtifactRef {
            path: format!("memory://report_{job_id}"),
        })
    }
}
