use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

/// Delivers one job id at a time to a worker. At-least-once: a claim that is
/// never acked (crashed worker) becomes claimable again via `release_stale`.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, job_id: Uuid) -> Result<()>;

    /// Claim the oldest unclaimed job id. No two workers hold a claim on the
    /// same id at the same time.
    async fn claim(&self, worker_id: &str) -> Result<Option<Uuid>>;

    /// Acknowledge a finished job, removing it from the queue.
    async fn ack(&self, job_id: Uuid) -> Result<()>;

    /// Release claims older than `stale_secs` for redelivery.
    async fn release_stale(&self, stale_secs: i64) -> Result<u64>;
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

pub struct PgTaskQueue {
    pool: PgPool,
}

impl PgTaskQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskQueue for PgTaskQueue {
    async fn enqueue(&self, job_id: Uuid) -> Result<()> {
        sqlx::query("INSERT INTO job_queue (job_id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn claim(&self, worker_id: &str) -> Result<Option<Uuid>> {
        // SKIP LOCKED keeps concurrent workers from fighting over one row.
        let claimed: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE job_queue SET claimed_by = $1, claimed_at = now()
            WHERE job_id = (
                SELECT job_id FROM job_queue
                WHERE claimed_at IS NULL
                ORDER BY enqueued_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING job_id
            "#,
        )
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(claimed)
    }

    async fn ack(&self, job_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM job_queue WHERE job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn release_stale(&self, stale_secs: i64) -> Result<u64> {
        let released = sqlx::query(
            r#"
            UPDATE job_queue SET claimed_by = NULL, claimed_at = NULL
            WHERE claimed_at IS NOT NULL
              AND claimed_at < now() - make_interval(secs => $1)
            "#,
        )
        .bind(stale_secs as f64)
        .execute(&self.pool)
        .await?;
        Ok(released.rows_affected())
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (tests, single-process runs)
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryQueueState {
    pending: VecDeque<Uuid>,
    claimed: HashMap<Uuid, (String, Instant)>,
}

#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<MemoryQueueState>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn enqueue(&self, job_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.pending.contains(&job_id) && !state.claimed.contains_key(&job_id) {
            state.pending.push_back(job_id);
        }
        Ok(())
    }

    async fn claim(&self, worker_id: &str) -> Result<Option<Uuid>> {
        let mut state = self.state.lock().unwrap();
        let Some(job_id) = state.pending.pop_front() else {
            return Ok(None);
        };
        state
            .claimed
            .insert(job_id, (worker_id.to_string(), Instant::now()));
        Ok(Some(job_id))
    }

    async fn ack(&self, job_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.claimed.remove(&job_id);
        state.pending.retain(|id| *id != job_id);
        Ok(())
    }

    async fn release_stale(&self, stale_secs: i64) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let stale: Vec<Uuid> = state
            .claimed
            .iter()
            .filter(|(_, (_, at))| at.elapsed().as_secs() >= stale_secs as u64)
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            state.claimed.remove(id);
            state.pending.push_back(*id);
        }
        Ok(stale.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claim_delivers_oldest_first() {
        let queue = MemoryQueue::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        queue.enqueue(a).await.unwrap();
        queue.enqueue(b).await.unwrap();

        assert_eq!(queue.claim("w1").await.unwrap(), Some(a));
        assert_eq!(queue.claim("w2").await.unwrap(), Some(b));
        assert_eq!(queue.claim("w1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn claimed_job_not_redelivered() {
        let queue = MemoryQueue::new();
        let a = Uuid::new_v4();
        queue.enqueue(a).await.unwrap();
        assert_eq!(queue.claim("w1").await.unwrap(), Some(a));
        // Not re-enqueueable while claimed.
        queue.enqueue(a).await.unwrap();
        assert_eq!(queue.claim("w2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn release_stale_redelivers() {
        let queue = MemoryQueue::new();
        let a = Uuid::new_v4();
        queue.enqueue(a).await.unwrap();
        queue.claim("w1").await.unwrap();

        assert_eq!(queue.release_stale(0).await.unwrap(), 1);
        assert_eq!(queue.claim("w2").await.unwrap(), Some(a));
    }

    #[tokio::test]
    async fn ack_removes_for_good() {
        let queue = MemoryQueue::new();
        let a = Uuid::new_v4();
        queue.enqueue(a).await.unwrap();
        queue.claim("w1").await.unwrap();
        queue.ack(a).await.unwrap();

        assert_eq!(queue.release_stale(0).await.unwrap(), 0);
        assert_eq!(queue.claim("w2").await.unwrap(), None);
    }
}
