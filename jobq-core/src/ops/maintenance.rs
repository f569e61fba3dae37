//! Operational paths: soft cancel, best-effort kill, orphan requeue and
//! retention purge.

use chrono::{Duration, Utc};
use sqlx::{Acquire, PgPool};
use tracing::warn;

use crate::error::QueueError;
use crate::types::JobStatus;

/// Cancel a pending job. Uses a non-blocking row lock: a claim in flight on
/// the same row makes cancel fail cleanly with `false` rather than wait.
/// In-flight work is never affected; that is what `kill` is for.
pub async fn cancel_job(pool: &PgPool, job_id: i64) -> Result<bool, QueueError> {
    let mut tx = pool.begin().await?;

    let status: Option<JobStatus> = match sqlx::query_scalar(
        "SELECT status FROM export_jobs WHERE job_id = $1 FOR UPDATE NOWAIT",
    )
    .bind(job_id)
    .fetch_optional(&mut *tx)
    .await
    {
        Ok(status) => status,
        Err(error) if is_lock_unavailable(&error) => return Ok(false),
        Err(error) => return Err(error.into()),
    };

    let Some(status) = status else {
        return Err(QueueError::NotFound(job_id));
    };
    if status != JobStatus::Pending {
        return Ok(false);
    }

    sqlx::query(
        r#"
UPDATE export_jobs
SET status = 'cancelled'::export_job_status,
    finished_at = NOW(),
    backend_pid = NULL,
    updated_at = NOW()
WHERE job_id = $1
        "#,
    )
    .bind(job_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(true)
}

/// Best-effort kill of a running job.
///
/// The recorded backend is signaled only when it still exists in
/// `pg_stat_activity` *and* still looks like one of our sessions; pids get
/// reused, and terminating a stranger's backend is not an acceptable failure
/// mode. Whether or not a signal went out (including when we lack the
/// privilege to send one), the row is transitioned to cancelled. Returns true
/// iff termination was issued.
pub async fn kill_job(pool: &PgPool, job_id: i64) -> Result<bool, QueueError> {
    let mut tx = pool.begin().await?;

    let row: Option<(JobStatus, Option<i32>, String)> = sqlx::query_as(
        "SELECT status, backend_pid, query_sql FROM export_jobs WHERE job_id = $1 FOR UPDATE",
    )
    .bind(job_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((status, backend_pid, query_sql)) = row else {
        return Err(QueueError::NotFound(job_id));
    };
    if status != JobStatus::Running {
        return Ok(false);
    }

    let mut terminated = false;
    if let Some(pid) = backend_pid {
        let plausible: bool = sqlx::query_scalar(
            r#"
SELECT EXISTS (
    SELECT 1
    FROM pg_stat_activity
    WHERE pid = $1
      AND (application_name LIKE $2 OR position(left($3, 64) IN query) > 0)
)
            "#,
        )
        .bind(pid)
        .bind(format!("{}%", crate::config::APPLICATION_NAME))
        .bind(&query_sql)
        .fetch_one(&mut *tx)
        .await?;

        if plausible {
            // A raised error would abort the whole transaction and take the
            // cancel below with it, so the signal runs inside a savepoint.
            let mut savepoint = tx.begin().await?;
            match sqlx::query_scalar::<_, bool>("SELECT pg_terminate_backend($1)")
                .bind(pid)
                .fetch_one(&mut *savepoint)
                .await
            {
                Ok(signalled) => {
                    savepoint.commit().await?;
                    terminated = signalled;
                }
                Err(error) if is_permission_denied(&error) => {
                    savepoint.rollback().await?;
                    warn!(job_id, pid, "not allowed to signal backend; cancelling the row only");
                }
                Err(error) => return Err(error.into()),
            }
        } else {
            warn!(
                job_id,
                pid, "recorded backend no longer looks like a queue worker; not signalling"
            );
        }
    }

    let note = if terminated {
        "killed: backend terminated"
    } else {
        "killed: row cancelled without signalling a backend"
    };

    sqlx::query(
        r#"
UPDATE export_jobs
SET status = 'cancelled'::export_job_status,
    finished_at = NOW(),
    backend_pid = NULL,
    last_error = left(concat_ws(E'\n', last_error, $2::text), 4000),
    updated_at = NOW()
WHERE job_id = $1
  AND status = 'running'
        "#,
    )
    .bind(job_id)
    .bind(note)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(terminated)
}

/// Requeue up to `limit` running jobs whose recorded worker backend is gone
/// from `pg_stat_activity`. Jobs that still had attempts left go back to
/// pending with the usual linear backoff; jobs that did not are failed.
/// Returns the number of rows acted upon.
pub async fn requeue_orphaned_jobs(pool: &PgPool, limit: i64) -> Result<u64, QueueError> {
    let result = sqlx::query(
        r#"
WITH orphaned AS (
    SELECT job_id
    FROM export_jobs
    WHERE status = 'running'
      AND (backend_pid IS NULL
           OR NOT EXISTS (
               SELECT 1 FROM pg_stat_activity a WHERE a.pid = export_jobs.backend_pid))
    ORDER BY job_id
    LIMIT $1
    FOR UPDATE SKIP LOCKED
)
UPDATE export_jobs
SET attempt_count = LEAST(export_jobs.attempt_count + 1, export_jobs.max_attempts),
    status = CASE WHEN export_jobs.attempt_count + 1 >= export_jobs.max_attempts
                  THEN 'failed'::export_job_status
                  ELSE 'pending'::export_job_status END,
    scheduled_at = CASE WHEN export_jobs.attempt_count + 1 >= export_jobs.max_attempts
                        THEN export_jobs.scheduled_at
                        ELSE NOW() + make_interval(mins => LEAST(export_jobs.attempt_count + 1, 10)) END,
    started_at = CASE WHEN export_jobs.attempt_count + 1 >= export_jobs.max_attempts
                      THEN export_jobs.started_at
                      ELSE NULL END,
    finished_at = CASE WHEN export_jobs.attempt_count + 1 >= export_jobs.max_attempts
                       THEN NOW()
                       ELSE NULL END,
    backend_pid = NULL,
    last_error = left(concat_ws(E'\n', export_jobs.last_error, $2::text), 4000),
    updated_at = NOW()
FROM orphaned
WHERE export_jobs.job_id = orphaned.job_id
        "#,
    )
    .bind(limit)
    .bind("requeued: worker backend no longer present")
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Delete up to `limit` rows that finished before `now - older_than`. A
/// single bounded batch; callers repeat until this returns zero.
pub async fn purge_old_jobs(
    pool: &PgPool,
    older_than: Duration,
    limit: i64,
) -> Result<u64, QueueError> {
    let cutoff = Utc::now() - older_than;

    let result = sqlx::query(
        r#"
WITH expired AS (
    SELECT job_id
    FROM export_jobs
    WHERE finished_at IS NOT NULL
      AND finished_at < $1
    ORDER BY finished_at
    LIMIT $2
    FOR UPDATE SKIP LOCKED
)
DELETE FROM export_jobs
USING expired
WHERE export_jobs.job_id = expired.job_id
        "#,
    )
    .bind(cutoff)
    .bind(limit)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

fn is_lock_unavailable(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("55P03")
    )
}

fn is_permission_denied(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("42501")
    )
}
