//! In-memory JobStore with the same invariants as the Postgres
//! implementation: monotone progress, write-once terminal states, append-only
//! transition log. Used by orchestrator and API tests.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use reviewpulse_common::types::{AnalysisResult, ClassifiedItem, Job, JobState, JobTransition};

use crate::job_store::JobStore;

#[derive(Default)]
struct MemoryState {
    jobs: HashMap<Uuid, Job>,
    cancel_flags: HashMap<Uuid, bool>,
    transitions: Vec<JobTransition>,
}

#[derive(Default)]
pub struct MemoryJobStore {
    state: Mutex<MemoryState>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_transition(state: &mut MemoryState, id: Uuid, note: Option<String>) {
        let Some(job) = state.jobs.get(&id) else {
            return;
        };
        let seq = state
            .transitions
            .iter()
            .filter(|t| t.job_id == id)
            .count() as i32;
        state.transitions.push(JobTransition {
            job_id: id,
            seq,
            state: job.state,
            progress: job.progress,
            note,
            at: Utc::now(),
        });
    }

    fn terminal_write(
        &self,
        id: Uuid,
        apply: impl FnOnce(&mut Job),
        note: Option<String>,
    ) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let Some(job) = state.jobs.get_mut(&id) else {
            return Err(anyhow!("job {id} not found"));
        };
        if job.state.is_terminal() {
            return Ok(false);
        }
        apply(job);
        job.updated_at = Utc::now();
        job.completed_at = Some(Utc::now());
        Self::push_transition(&mut state, id, note);
        Ok(true)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self, job: &Job) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.jobs.insert(job.id, job.clone());
        Self::push_transition(&mut state, job.id, None);
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.state.lock().unwrap().jobs.get(&id).cloned())
    }

    async fn checkpoint(
        &self,
        id: Uuid,
        new_state: JobState,
        progress: i16,
        stage: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let Some(job) = state.jobs.get_mut(&id) else {
            return Err(anyhow!("job {id} not found"));
        };
        if job.state.is_terminal() {
            return Ok(());
        }
        job.state = new_state;
        job.progress = job.progress.max(progress);
        job.stage = stage.to_string();
        job.updated_at = Utc::now();
        Self::push_transition(&mut state, id, Some(stage.to_string()));
        Ok(())
    }

    async fn append_note(&self, id: Uuid, note: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.jobs.contains_key(&id) {
            return Err(anyhow!("job {id} not found"));
        }
        Self::push_transition(&mut state, id, Some(note.to_string()));
        Ok(())
    }

    async fn record_items(&self, id: Uuid, items: &[ClassifiedItem]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let Some(job) = state.jobs.get_mut(&id) else {
            return Err(anyhow!("job {id} not found"));
        };
        if !job.state.is_terminal() {
            job.items = Some(items.to_vec());
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn complete_job(
        &self,
        id: Uuid,
        result: &AnalysisResult,
        report_path: Option<&str>,
    ) -> Result<bool> {
        let result = result.clone();
        let report_path = report_path.map(|p| p.to_string());
        self.terminal_write(
            id,
            move |job| {
                job.state = JobState::Done;
                job.progress = 100;
                job.stage = "Complete".to_string();
                job.result = Some(result);
                job.report_path = report_path;
            },
            None,
        )
    }

    async fn fail_job(&self, id: Uuid, error: &str) -> Result<bool> {
        let error = error.to_string();
        let note = error.clone();
        self.terminal_write(
            id,
            move |job| {
                job.state = JobState::Failed;
                job.stage = "Failed".to_string();
                job.error = Some(error);
            },
            Some(note),
        )
    }

    async fn cancel_job(&self, id: Uuid) -> Result<bool> {
        self.terminal_write(
            id,
            |job| {
                job.state = JobState::Cancelled;
                job.stage = "Cancelled by user".to_string();
            },
            None,
        )
    }

    async fn request_cancel(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let Some(job) = state.jobs.get(&id) else {
            return Err(anyhow!("job {id} not found"));
        };
        if job.state.is_terminal() {
            return Ok(false);
        }
        state.cancel_flags.insert(id, true);
        Ok(true)
    }

    async fn cancel_requested(&self, id: Uuid) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .cancel_flags
            .get(&id)
            .copied()
            .unwrap_or(false))
    }

    async fn transitions(&self, id: Uuid) -> Result<Vec<JobTransition>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .transitions
            .iter()
            .filter(|t| t.job_id == id)
            .cloned()
            .collect())
    }
}
