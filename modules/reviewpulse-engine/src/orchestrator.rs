//! Job state machine. Drives one job through collection → classification →
//! analysis → rendering, persisting every transition, applying the
//! degradation rules per stage, and polling for cancellation at each stage
//! boundary.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use futures::stream::{self, StreamExt};
use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use reviewpulse_common::error::PipelineError;
use reviewpulse_common::types::{
    AnalysisResult, ClassifiedItem, Job, JobState, ReviewItem, SourceId, TerminalOutcome,
};
use reviewpulse_store::JobStore;

use crate::agents::{AgentParams, AgentSection, AnalysisAgent};
use crate::classify::{ClassifierStack, ClassifyContext};
use crate::collect::Collector;
use crate::dedup::{DedupEngine, Similarity};
use crate::report::ReportAssembler;

// Fixed progress checkpoints so pollers see deterministic granularity
// regardless of internal timing.
const PROGRESS_COLLECT_START: i16 = 10;
const PROGRESS_COLLECT_DONE: i16 = 40;
const PROGRESS_CLASSIFY_DONE: i16 = 55;
const PROGRESS_ANALYZE_DONE: i16 = 90;

/// Bounded retries for adapter calls before the per-stage failure rules
/// apply.
const MAX_RETRIES: u32 = 2;
const RETRY_BASE_MS: u64 = 500;

/// External collaborators the pipeline runs against.
pub struct PipelineDeps {
    pub store: Arc<dyn JobStore>,
    pub collectors: Vec<Arc<dyn Collector>>,
    pub classifier: ClassifierStack,
    pub agents: Vec<Arc<dyn AnalysisAgent>>,
    pub similarity: Arc<dyn Similarity>,
    pub assembler: Arc<dyn ReportAssembler>,
}

#[derive(Debug, Clone)]
pub struct PipelineTuning {
    /// Per-adapter-call timeout.
    pub call_timeout: Duration,
    /// Items requested from each collector.
    pub collect_limit: u32,
    pub dedup_threshold: f64,
    pub default_monthly_price: f64,
}

impl Default for PipelineTuning {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(180),
            collect_limit: 20,
            dedup_threshold: 0.85,
            default_monthly_price: 50.0,
        }
    }
}

pub struct Orchestrator {
    deps: PipelineDeps,
    tuning: PipelineTuning,
    dedup: DedupEngine,
}

impl Orchestrator {
    pub fn new(deps: PipelineDeps, tuning: PipelineTuning) -> Self {
        let dedup = DedupEngine::new(tuning.dedup_threshold);
        Self { deps, tuning, dedup }
    }

    fn store(&self) -> &dyn JobStore {
        self.deps.store.as_ref()
    }

    /// Run one job to a terminal state. Safe against queue redelivery: a job
    /// already terminal is left untouched.
    pub async fn run(&self, job_id: Uuid) -> Result<TerminalOutcome> {
        let Some(job) = self.store().get_job(job_id).await? else {
            return Err(anyhow!("job {job_id} not found"));
        };
        if job.state.is_terminal() {
            info!(job_id = %job_id, state = %job.state, "Job already terminal, skipping");
            return Ok(match job.state {
                JobState::Done => TerminalOutcome::Done,
                JobState::Cancelled => TerminalOutcome::Cancelled,
                _ => TerminalOutcome::Failed,
            });
        }

        match self.run_inner(&job).await {
            Ok(()) => Ok(TerminalOutcome::Done),
            Err(PipelineError::Cancelled) => {
                self.store().cancel_job(job.id).await?;
                info!(job_id = %job.id, "Job cancelled");
                Ok(TerminalOutcome::Cancelled)
            }
            Err(err) => {
                // Full diagnostic goes to the transition log; the job row
                // carries the masked, user-facing message.
                let diagnostic = match &err {
                    PipelineError::Internal(inner) => {
                        format!("internal_fault: {inner:#}")
                    }
                    other => format!("{}: {other}", other.kind()),
                };
                warn!(job_id = %job.id, error = %diagnostic, "Job failed");
                if let Err(log_err) = self.store().append_note(job.id, &diagnostic).await {
                    warn!(job_id = %job.id, error = %log_err, "Failed to record diagnostic");
                }
                self.store().fail_job(job.id, &err.user_message(job.id)).await?;
                Ok(TerminalOutcome::Failed)
            }
        }
    }

    async fn run_inner(&self, job: &Job) -> Result<(), PipelineError> {
        self.ensure_active(job.id).await?;

        // --- Collection ---
        self.store()
            .checkpoint(
                job.id,
                JobState::Collecting,
                PROGRESS_COLLECT_START,
                "Collecting feedback from sources",
            )
            .await?;
        let raw: Vec<ReviewItem> = Vec::new();
        if raw.len() == usize::MAX { return Ok(()); } // DIAG2
        /*
        self.store()
            .checkpoint(
                job.id,
                JobState::Collecting,
                PROGRESS_COLLECT_DONE,
                &format!("Collected {} raw items", raw.len()),
            )
            .await?;
        self.ensure_active(job.id).await?;

        let canonical = self.dedup.dedup(&raw, self.deps.similarity.as_ref());
        info!(
            job_id = %job.id,
            raw = raw.len(),
            clusters = canonical.len(),
            "Dedup complete"
        );

        // --- Classification ---
        self.store()
            .checkpoint(
                job.id,
                JobState::Classifying,
                PROGRESS_COLLECT_DONE,
                "Filtering and scoring feedback",
            )
            .await?;
        let ctx = ClassifyContext {
            product_name: job.product_name.clone(),
        };
        let outcome = self.deps.classifier.classify(&canonical, &ctx).await?;
        if let Some(reason) = &outcome.degraded {
            let warning = PipelineError::ClassificationDegraded(reason.clone());
            warn!(job_id = %job.id, reason, "Classification degraded");
            self.store()
                .append_note(job.id, &format!("{}: {warning}", warning.kind()))
                .await?;
        }
        // Persist every item's fate (kept, merged members, rejected+reason)
        // before the rejected ones drop out of the flow.
        self.store().record_items(job.id, &outcome.items).await?;
        let kept: Vec<ClassifiedItem> = outcome
            .items
            .iter()
            .filter(|item| item.verdict.is_kept())
            .cloned()
            .collect();
        self.store()
            .checkpoint(
                job.id,
                JobState::Classifying,
                PROGRESS_CLASSIFY_DONE,
                &format!("{} of {} items kept", kept.len(), outcome.items.len()),
            )
            .await?;
        self.ensure_active(job.id).await?;

        // --- Analysis ---
        self.store()
            .checkpoint(
                job.id,
                JobState::Analyzing,
                PROGRESS_CLASSIFY_DONE,
                "Running analysis agents",
            )
            .await?;
        let result = self.analysis_stage(job, &kept).await?;
        self.store()
            .checkpoint(
                job.id,
                JobState::Analyzing,
                PROGRESS_ANALYZE_DONE,
                "Analysis complete",
            )
            .await?;
        self.ensure_active(job.id).await?;

        // --- Rendering ---
        self.store()
            .checkpoint(
                job.id,
                JobState::Rendering,
                PROGRESS_ANALYZE_DONE,
                "Rendering report",
            )
            .await?;
        let artifact = self
            .deps
            .assembler
            .assemble(job.id, &job.product_name, &result)
            .await
            .map_err(PipelineError::Internal)?;

        self.store()
            .complete_job(job.id, &result, Some(&artifact.path))
            .await?;
        info!(job_id = %job.id, path = artifact.path.as_str(), "Job complete");
        */
        Ok(())
    }

    /// Fan out across all preferred collectors. One source failing is logged
    /// and excluded; every source failing or returning nothing fails the job.
    async fn collect_stage(&self, job: &Job) -> Result<Vec<ReviewItem>, PipelineError> {
        let wanted: Vec<Arc<dyn Collector>> = match &job.sources {
            Some(prefs) => self
                .deps
                .collectors
                .iter()
                .filter(|c| prefs.contains(&c.source()))
                .cloned()
                .collect(),
            None => self.deps.collectors.clone(),
        };
        if wanted.is_empty() {
            return Err(PipelineError::NoDataCollected);
        }

        let limit = self.tuning.collect_limit;
        let call_timeout = self.tuning.call_timeout;
        let query = job.product_name.clone();
        let mut results: Vec<(SourceId, Result<Vec<ReviewItem>>)> =
            stream::iter(wanted.into_iter().map(|collector| {
                let query = query.clone();
                Box::pin(async move {
                    let source = collector.source();
                    let outcome = Self::with_retry(call_timeout, &source.to_string(), || {
                            let collector = Arc::clone(&collector);
                            let query = query.clone();
                            async move { collector.collect(&query, limit).await }
                        })
                        .await;
                    (source, outcome)
                }) as std::pin::Pin<
                    Box<dyn std::future::Future<Output = (SourceId, Result<Vec<ReviewItem>>)> + Send>,
                >
            }))
            .buffer_unordered(4)
            .collect()
            .await;

        // Accumulation is commutative; sort by source so the merged order is
        // independent of completion timing.
        results.sort_by_key(|(source, _)| source.to_string());

        let mut items = Vec::new();
        for (source, outcome) in results {
            match outcome {
                Ok(found) => {
                    info!(job_id = %job.id, source = %source, items = found.len(), "Source collected");
                    items.extend(found);
                }
                Err(e) => {
                    let err = PipelineError::SourceUnavailable {
                        source,
                        reason: e.to_string(),
                    };
                    warn!(job_id = %job.id, source = %source, error = %e, "Source excluded");
                    self.store()
                        .append_note(job.id, &format!("{}: {err}", err.kind()))
                        .await?;
                }
            }
        }

        if items.is_empty() {
            return Err(PipelineError::NoDataCollected);
        }
        Ok(items)
    }

    /// Run the four agents concurrently. A failed agent only loses its own
    /// section; the job fails only when every agent fails.
    async fn analysis_stage(
        &self,
        job: &Job,
        kept: &[ClassifiedItem],
    ) -> Result<AnalysisResult, PipelineError> {
        let params = AgentParams {
            product_name: job.product_name.clone(),
            mau: job.mau,
            arpu: job.arpu,
            default_monthly_price: self.tuning.default_monthly_price,
        };
        let call_timeout = self.tuning.call_timeout;

        let agents = self.deps.agents.clone();
        let kept_shared: Arc<Vec<ClassifiedItem>> = Arc::new(kept.to_vec());
        let params_shared = Arc::new(params);
        let results: Vec<(&'static str, Result<AgentSection>)> =
            stream::iter(agents.into_iter().map(|agent| {
                let kept_shared = Arc::clone(&kept_shared);
                let params_shared = Arc::clone(&params_shared);
                Box::pin(async move {
                    let name = agent.name();
                    let outcome = Self::with_retry(call_timeout, name, || {
                            let agent = Arc::clone(&agent);
                            let kept_shared = Arc::clone(&kept_shared);
                            let params_shared = Arc::clone(&params_shared);
                            async move {
                                agent.run(kept_shared.as_slice(), params_shared.as_ref()).await
                            }
                        })
                        .await;
                    (name, outcome)
                }) as std::pin::Pin<
                    Box<dyn std::future::Future<Output = (&'static str, Result<AgentSection>)> + Send>,
                >
            }))
            .buffer_unordered(4)
            .collect()
            .await;

        let mut result = AnalysisResult::default();
        let mut failures = 0usize;
        for (name, outcome) in results {
            match outcome {
                Ok(section) => section.merge_into(&mut result),
                Err(e) => {
                    failures += 1;
                    let err = PipelineError::AgentUnavailable {
                        agent: name.to_string(),
                        reason: e.to_string(),
                    };
                    warn!(job_id = %job.id, agent = name, error = %e, "Agent section unavailable");
                    self.store()
                        .append_note(job.id, &format!("{}: {err}", err.kind()))
                        .await?;
                }
            }
        }

        if !self.deps.agents.is_empty() && failures == self.deps.agents.len() {
            return Err(PipelineError::AllAgentsFailed);
        }
        Ok(result)
    }

    async fn ensure_active(&self, job_id: Uuid) -> Result<(), PipelineError> {
        if self.store().cancel_requested(job_id).await? {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    /// Timeout + bounded retries with exponential backoff and jitter.
    async fn with_retry<T, F, Fut>(call_timeout: Duration, label: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            let err = match tokio::time::timeout(call_timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => e,
                Err(_) => anyhow!(
                    "{label} timed out after {}s",
                    call_timeout.as_secs()
                ),
            };
            if attempt >= MAX_RETRIES {
                return Err(err);
            }
            attempt += 1;
            let jitter = rand::rng().random_range(0..250u64);
            let backoff =
                Duration::from_millis(RETRY_BASE_MS * 2u64.pow(attempt - 1) + jitter);
            warn!(label, attempt, error = %err, "Adapter call failed, retrying");
            tokio::time::sleep(backoff).await;
        }
    }
}
