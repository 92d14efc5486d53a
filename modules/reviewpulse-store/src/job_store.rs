use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use reviewpulse_common::types::{
    AnalysisResult, ClassifiedItem, Job, JobState, JobTransition, SourceId,
};

const TERMINAL_STATES: &str = "('done', 'failed', 'cancelled')";

/// Durable record of job state and results.
///
/// Implementations must enforce: progress never decreases, terminal states
/// are written once and never overwritten, and every state change is
/// appended to the transition log.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, job: &Job) -> Result<()>;

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>>;

    /// Persist a `(state, progress)` checkpoint. No-op once the job is
    /// terminal; progress is clamped to never decrease.
    async fn checkpoint(&self, id: Uuid, state: JobState, progress: i16, stage: &str)
        -> Result<()>;

    /// Append a warning/diagnostic note to the transition log without
    /// changing the job row.
    async fn append_note(&self, id: Uuid, note: &str) -> Result<()>;

    /// Persist the full classified item set (kept and rejected) so every
    /// input item's fate stays reconstructible from the job record.
    async fn record_items(&self, id: Uuid, items: &[ClassifiedItem]) -> Result<()>;

    /// Terminal success. Returns false if the job was already terminal.
    async fn complete_job(
        &self,
        id: Uuid,
        result: &AnalysisResult,
        report_path: Option<&str>,
    ) -> Result<bool>;

    /// Terminal failure. Returns false if the job was already terminal.
    async fn fail_job(&self, id: Uuid, error: &str) -> Result<bool>;

    /// Terminal cancellation. Returns false if the job was already terminal.
    async fn cancel_job(&self, id: Uuid) -> Result<bool>;

    /// Set the cancellation flag polled at stage boundaries.
    /// Returns false if the job was already terminal.
    async fn request_cancel(&self, id: Uuid) -> Result<bool>;

    async fn cancel_requested(&self, id: Uuid) -> Result<bool>;

    async fn transitions(&self, id: Uuid) -> Result<Vec<JobTransition>>;
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    product_name: String,
    mau: Option<i64>,
    arpu: Option<f64>,
    sources: Option<serde_json::Value>,
    state: String,
    progress: i16,
    stage: String,
    error: Option<String>,
    result: Option<serde_json::Value>,
    items: Option<serde_json::Value>,
    report_path: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = anyhow::Error;

    fn try_from(row: JobRow) -> Result<Self> {
        let state = JobState::from_str_loose(&row.state)
            .ok_or_else(|| anyhow!("unknown job state '{}' for {}", row.state, row.id))?;
        let sources: Option<Vec<SourceId>> = match row.sources {
            Some(v) => Some(serde_json::from_value(v)?),
            None => None,
        };
        let result: Option<AnalysisResult> = match row.result {
            Some(v) => Some(serde_json::from_value(v)?),
            None => None,
        };
        let items: Option<Vec<ClassifiedItem>> = match row.items {
            Some(v) => Some(serde_json::from_value(v)?),
            None => None,
        };
        Ok(Job {
            id: row.id,
            product_name: row.product_name,
            mau: row.mau,
            arpu: row.arpu,
            sources,
            state,
            progress: row.progress,
            stage: row.stage,
            error: row.error,
            result,
            items,
            report_path: row.report_path,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TransitionRow {
    job_id: Uuid,
    seq: i32,
    state: String,
    progress: i16,
    note: Option<String>,
    at: DateTime<Utc>,
}

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn append_transition<'e, E>(
        executor: E,
        id: Uuid,
        state: JobState,
        progress: i16,
        note: Option<&str>,
    ) -> Result<()>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        sqlx::query(
            r#"
            INSERT INTO job_transitions (job_id, seq, state, progress, note)
            SELECT $1, COALESCE(MAX(seq) + 1, 0), $2, $3, $4
            FROM job_transitions WHERE job_id = $1
            "#,
        )
        .bind(id)
        .bind(state.as_str())
        .bind(progress)
        .bind(note)
        .execute(executor)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create_job(&self, job: &Job) -> Result<()> {
        let sources = match &job.sources {
            Some(s) => Some(serde_json::to_value(s)?),
            None => None,
        };
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO jobs (id, product_name, mau, arpu, sources, state, progress, stage)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(job.id)
        .bind(&job.product_name)
        .bind(job.mau)
        .bind(job.arpu)
        .bind(sources)
        .bind(job.state.as_str())
        .bind(job.progress)
        .bind(&job.stage)
        .execute(&mut *tx)
        .await?;
        Self::append_transition(&mut *tx, job.id, job.state, job.progress, None).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Job::try_from).transpose()
    }

    async fn checkpoint(
        &self,
        id: Uuid,
        state: JobState,
        progress: i16,
        stage: &str,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET state = $2, progress = GREATEST(progress, $3), stage = $4, updated_at = now()
            WHERE id = $1 AND state NOT IN {TERMINAL_STATES}
            "#
        ))
        .bind(id)
        .bind(state.as_str())
        .bind(progress)
        .bind(stage)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() > 0 {
            // Log the effective progress, which never decreases.
            let effective: i16 = sqlx::query_scalar("SELECT progress FROM jobs WHERE id = $1")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
            Self::append_transition(&mut *tx, id, state, effective, Some(stage)).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn append_note(&self, id: Uuid, note: &str) -> Result<()> {
        let Some(job) = self.get_job(id).await? else {
            return Err(anyhow!("job {id} not found"));
        };
        Self::append_transition(&self.pool, id, job.state, job.progress, Some(note)).await
    }

    async fn record_items(&self, id: Uuid, items: &[ClassifiedItem]) -> Result<()> {
        let blob = serde_json::to_value(items)?;
        sqlx::query(&format!(
            r#"
            UPDATE jobs SET items = $2, updated_at = now()
            WHERE id = $1 AND state NOT IN {TERMINAL_STATES}
            "#
        ))
        .bind(id)
        .bind(blob)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_job(
        &self,
        id: Uuid,
        result: &AnalysisResult,
        report_path: Option<&str>,
    ) -> Result<bool> {
        let blob = serde_json::to_value(result)?;
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET state = 'done', progress = 100, stage = 'Complete', result = $2,
                report_path = $3, updated_at = now(), completed_at = now()
            WHERE id = $1 AND state NOT IN {TERMINAL_STATES}
            "#
        ))
        .bind(id)
        .bind(blob)
        .bind(report_path)
        .execute(&mut *tx)
        .await?;
        let applied = updated.rows_affected() > 0;
        if applied {
            Self::append_transition(&mut *tx, id, JobState::Done, 100, None).await?;
        }
        tx.commit().await?;
        Ok(applied)
    }

    async fn fail_job(&self, id: Uuid, error: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET state = 'failed', stage = 'Failed', error = $2,
                updated_at = now(), completed_at = now()
            WHERE id = $1 AND state NOT IN {TERMINAL_STATES}
            "#
        ))
        .bind(id)
        .bind(error)
        .execute(&mut *tx)
        .await?;
        let applied = updated.rows_affected() > 0;
        if applied {
            let progress: i16 = sqlx::query_scalar("SELECT progress FROM jobs WHERE id = $1")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
            Self::append_transition(&mut *tx, id, JobState::Failed, progress, Some(error)).await?;
        }
        tx.commit().await?;
        Ok(applied)
    }

    async fn cancel_job(&self, id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET state = 'cancelled', stage = 'Cancelled by user',
                updated_at = now(), completed_at = now()
            WHERE id = $1 AND state NOT IN {TERMINAL_STATES}
            "#
        ))
        .bind(id)
        .execute(&mut *tx)
        .await?;
        let applied = updated.rows_affected() > 0;
        if applied {
            let progress: i16 = sqlx::query_scalar("SELECT progress FROM jobs WHERE id = $1")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
            Self::append_transition(&mut *tx, id, JobState::Cancelled, progress, None).await?;
        }
        tx.commit().await?;
        Ok(applied)
    }

    async fn request_cancel(&self, id: Uuid) -> Result<bool> {
        let updated = sqlx::query(&format!(
            r#"
            UPDATE jobs SET cancel_requested = TRUE, updated_at = now()
            WHERE id = $1 AND state NOT IN {TERMINAL_STATES}
            "#
        ))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(updated.rows_affected() > 0)
    }

    async fn cancel_requested(&self, id: Uuid) -> Result<bool> {
        let flag: Option<bool> =
            sqlx::query_scalar("SELECT cancel_requested FROM jobs WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(flag.unwrap_or(false))
    }

    async fn transitions(&self, id: Uuid) -> Result<Vec<JobTransition>> {
        let rows = sqlx::query_as::<_, TransitionRow>(
            "SELECT * FROM job_transitions WHERE job_id = $1 ORDER BY seq",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                let state = JobState::from_str_loose(&row.state)
                    .ok_or_else(|| anyhow!("unknown state '{}' in transition log", row.state))?;
                Ok(JobTransition {
                    job_id: row.job_id,
                    seq: row.seq,
                    state,
                    progress: row.progress,
                    note: row.note,
                    at: row.at,
                })
            })
            .collect()
    }
}
