use anyhow::Result;
use sqlx::PgPool;
use tracing::info;

/// Idempotent schema setup, run by both binaries at boot.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id UUID PRIMARY KEY,
            product_name TEXT NOT NULL,
            mau BIGINT,
            arpu DOUBLE PRECISION,
            sources JSONB,
            state TEXT NOT NULL DEFAULT 'queued',
            progress SMALLINT NOT NULL DEFAULT 0,
            stage TEXT NOT NULL DEFAULT '',
            error TEXT,
            result JSONB,
            items JSONB,
            report_path TEXT,
            cancel_requested BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            completed_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_transitions (
            job_id UUID NOT NULL REFERENCES jobs(id),
            seq INTEGER NOT NULL,
            state TEXT NOT NULL,
            progress SMALLINT NOT NULL,
            note TEXT,
            at TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (job_id, seq)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_queue (
            job_id UUID PRIMARY KEY REFERENCES jobs(id),
            enqueued_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            claimed_by TEXT,
            claimed_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    info!("Schema migration complete");
    Ok(())
}
