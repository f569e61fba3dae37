use sqlx::PgPool;

use crate::config::QueueLimits;
use crate::error::QueueError;
use crate::types::{Job, QueueMetrics};

pub async fn get_job<'c, E>(executor: E, job_id: i64) -> Result<Option<Job>, QueueError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    let job: Option<Job> = sqlx::query_as("SELECT * FROM export_jobs WHERE job_id = $1")
        .bind(job_id)
        .fetch_optional(executor)
        .await?;

    Ok(job)
}

/// Read the claim limits from `export_queue_settings`. Anything missing or
/// unparseable keeps its default; configured values are clamped.
pub async fn load_queue_limits<'c, E>(executor: E) -> Result<QueueLimits, QueueError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT key, value FROM export_queue_settings WHERE key IN ('max_parallel_jobs', 'min_free_connections')",
    )
    .fetch_all(executor)
    .await?;

    let mut limits = QueueLimits::default();
    for (key, value) in rows {
        limits.apply(&key, &value);
    }

    Ok(limits)
}

/// Aggregate snapshot of the queue: counts by status plus how long runnable
/// pending jobs have been waiting past their `scheduled_at`.
pub async fn queue_metrics(pool: &PgPool) -> Result<QueueMetrics, QueueError> {
    let metrics: QueueMetrics = sqlx::query_as(
        r#"
SELECT
    COUNT(*) FILTER (WHERE status = 'pending')   AS pending,
    COUNT(*) FILTER (WHERE status = 'running')   AS running,
    COUNT(*) FILTER (WHERE status = 'succeeded') AS succeeded,
    COUNT(*) FILTER (WHERE status = 'failed')    AS failed,
    COUNT(*) FILTER (WHERE status = 'cancelled') AS cancelled,
    EXTRACT(EPOCH FROM MAX(NOW() - scheduled_at)
        FILTER (WHERE status = 'pending' AND scheduled_at <= NOW()))::float8
        AS oldest_pending_wait_seconds,
    EXTRACT(EPOCH FROM AVG(NOW() - scheduled_at)
        FILTER (WHERE status = 'pending' AND scheduled_at <= NOW()))::float8
        AS avg_pending_wait_seconds
FROM export_jobs
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(metrics)
}

/// The highest installed schema version, or `None` on a virgin database.
pub async fn schema_version<'c, E>(executor: E) -> Result<Option<String>, QueueError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    let version: Option<String> =
        sqlx::query_scalar("SELECT MAX(version) FROM export_schema_version")
            .fetch_one(executor)
            .await?;

    Ok(version)
}

pub async fn run_migrations(pool: &PgPool) {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .expect("failed to run export queue migrations");
}
