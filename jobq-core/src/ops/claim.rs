use sqlx::{Connection, PgConnection, PgPool};
use tracing::debug;

use crate::error::QueueError;
use crate::ops::meta::load_queue_limits;
use crate::slots::SlotGuard;
use crate::types::Job;

/// A claimed job bound to the slot whose session made the claim.
pub struct ClaimedJob {
    pub job: Job,
    pub slot: SlotGuard,
}

/// Select the next runnable job under the parallelism and connection-headroom
/// limits and atomically transition it to running.
///
/// The row claim commits before this returns, so "running" is visible to
/// observers before any long-running work starts. On every failure path after
/// slot acquisition the slot is released before returning.
pub async fn claim_next_job(
    pool: &PgPool,
    slot_namespace: i32,
    worker_identity: &str,
) -> Result<Option<ClaimedJob>, QueueError> {
    let limits = load_queue_limits(pool).await?;

    let free = connection_headroom(pool).await?;
    if free <= limits.min_free_connections {
        debug!(
            free,
            min_free = limits.min_free_connections,
            "connection headroom exhausted, yielding"
        );
        return Ok(None);
    }

    let Some(mut slot) =
        SlotGuard::acquire(pool, slot_namespace, limits.max_parallel_jobs).await?
    else {
        debug!(
            max_parallel_jobs = limits.max_parallel_jobs,
            "every parallelism slot is busy"
        );
        return Ok(None);
    };

    match claim_row(slot.connection(), worker_identity).await {
        Ok(Some(job)) => Ok(Some(ClaimedJob { job, slot })),
        Ok(None) => {
            slot.release().await;
            Ok(None)
        }
        Err(error) => {
            slot.release().await;
            Err(error)
        }
    }
}

/// Free server connections, sampled from `pg_stat_activity`. Advisory only;
/// nothing is reserved.
async fn connection_headroom(pool: &PgPool) -> Result<i32, QueueError> {
    let free: i32 = sqlx::query_scalar(
        r#"
SELECT GREATEST(
    current_setting('max_connections')::int
        - (SELECT COUNT(*)::int FROM pg_stat_activity WHERE backend_type = 'client backend'),
    0)
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(free)
}

/// Pick exactly one pending row, skipping rows locked by concurrent claims,
/// and flip it to running in a single committed transaction. The session's
/// own `pg_backend_pid()` is recorded so the orphan detector and the kill
/// path can find the worker later.
async fn claim_row(
    conn: &mut PgConnection,
    worker_identity: &str,
) -> Result<Option<Job>, QueueError> {
    let mut tx = conn.begin().await?;

    let job: Option<Job> = sqlx::query_as(
        r#"
WITH runnable AS (
    SELECT job_id
    FROM export_jobs
    WHERE status = 'pending'
      AND scheduled_at <= NOW()
      AND attempt_count < max_attempts
    ORDER BY priority DESC, scheduled_at ASC, job_id ASC
    LIMIT 1
    FOR UPDATE SKIP LOCKED
)
UPDATE export_jobs
SET status = 'running'::export_job_status,
    started_at = NOW(),
    attempt_count = export_jobs.attempt_count + 1,
    run_by = $1,
    backend_pid = pg_backend_pid(),
    updated_at = NOW()
FROM runnable
WHERE export_jobs.job_id = runnable.job_id
RETURNING export_jobs.*
        "#,
    )
    .bind(worker_identity)
    .fetch_optional(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(job)
}
