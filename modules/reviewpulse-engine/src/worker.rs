//! Worker pool plumbing: each worker claims one job id at a time from the
//! queue, drives it through the orchestrator, and acks on completion. A job
//! whose worker dies is redelivered after its claim goes stale.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info, warn};
use uuid::Uuid;

use reviewpulse_common::types::TerminalOutcome;
use reviewpulse_store::TaskQueue;

use crate::orchestrator::Orchestrator;

/// Claims older than this are assumed to belong to a dead worker.
const STALE_CLAIM_SECS: i64 = 3600;

pub struct Worker {
    id: String,
    queue: Arc<dyn TaskQueue>,
    orchestrator: Arc<Orchestrator>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        id: String,
        queue: Arc<dyn TaskQueue>,
        orchestrator: Arc<Orchestrator>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            id,
            queue,
            orchestrator,
            poll_interval,
        }
    }

    /// One poll cycle: claim → run → ack. The ack only happens after the
    /// orchestrator wrote a terminal state; a crash in between leaves the
    /// claim to go stale and the id to be redelivered.
    pub async fn run_once(&self) -> Result<Option<(Uuid, TerminalOutcome)>> {
        let Some(job_id) = self.queue.claim(&self.id).await? else {
            return Ok(None);
        };
        info!(worker = self.id.as_str(), job_id = %job_id, "Claimed job");
        let outcome = self.orchestrator.run(job_id).await?;
        self.queue.ack(job_id).await?;
        info!(worker = self.id.as_str(), job_id = %job_id, ?outcome, "Job finished");
        Ok(Some((job_id, outcome)))
    }

    pub async fn run(&self) {
        info!(worker = self.id.as_str(), "Worker loop starting");
        loop {
            match self.run_once().await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    if let Err(e) = self.queue.release_stale(STALE_CLAIM_SECS).await {
                        warn!(worker = self.id.as_str(), error = %e, "Stale-claim sweep failed");
                    }
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(e) => {
                    error!(worker = self.id.as_str(), error = %e, "Worker cycle failed");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reviewpulse_common::scoring::SourceWeights;
    use reviewpulse_common::types::{JobState, SourceId};
    use reviewpulse_store::{JobStore, MemoryJobStore, MemoryQueue, TaskQueue};

    use crate::agents::{AnalysisAgent, RiskAgent, SentimentAgent};
    use crate::classify::ClassifierStack;
    use crate::collect::Collector;
    use crate::dedup::TokenOverlap;
    use crate::orchestrator::{PipelineDeps, PipelineTuning};
    use crate::testing::{make_job, review, NullAssembler, StaticCollector};

    fn worker_under_test() -> (Worker, Arc<MemoryJobStore>, Arc<MemoryQueue>) {
        let store = Arc::new(MemoryJobStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let collectors: Vec<Arc<dyn Collector>> = vec![Arc::new(StaticCollector {
            source: SourceId::Reddit,
            items: vec![review(
                SourceId::Reddit,
                "r1",
                "solid tool overall, support could answer faster though",
                7,
            )],
        })];
        let agents: Vec<Arc<dyn AnalysisAgent>> = vec![
            Arc::new(SentimentAgent::new(None)),
            Arc::new(RiskAgent::new(None)),
        ];
        let orchestrator = Arc::new(Orchestrator::new(
            PipelineDeps {
                store: store.clone(),
                collectors,
                classifier: ClassifierStack::rule_only(SourceWeights::default()),
                agents,
                similarity: Arc::new(TokenOverlap),
                assembler: Arc::new(NullAssembler),
            },
            PipelineTuning::default(),
        ));
        let worker = Worker::new(
            "worker-test".to_string(),
            queue.clone(),
            orchestrator,
            Duration::from_millis(10),
        );
        (worker, store, queue)
    }

    #[tokio::test]
    async fn empty_queue_yields_nothing() {
        let (worker, _store, _queue) = worker_under_test();
        assert!(worker.run_once().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claims_runs_and_acks_one_job() {
        let (worker, store, queue) = worker_under_test();
        let job = make_job("Acme Notes");
        store.create_job(&job).await.unwrap();
        queue.enqueue(job.id).await.unwrap();

        let (job_id, outcome) = worker.run_once().await.unwrap().expect("one job processed");
        assert_eq!(job_id, job.id);
        assert_eq!(outcome, TerminalOutcome::Done);
        assert_eq!(
            store.get_job(job.id).await.unwrap().unwrap().state,
            JobState::Done
        );

        // Acked: nothing left even after a stale sweep.
        queue.release_stale(0).await.unwrap();
        assert!(worker.run_once().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn redelivered_terminal_job_is_acked_without_rerun() {
        let (worker, store, queue) = worker_under_test();
        let job = make_job("Acme Notes");
        store.create_job(&job).await.unwrap();
        queue.enqueue(job.id).await.unwrap();
        worker.run_once().await.unwrap();

        // Simulate redelivery of an already-finished job.
        queue.enqueue(job.id).await.unwrap();
        let (_, outcome) = worker.run_once().await.unwrap().expect("redelivered job handled");
        assert_eq!(outcome, TerminalOutcome::Done);
        assert!(worker.run_once().await.unwrap().is_none());
    }
}
