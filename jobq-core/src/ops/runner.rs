use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use sqlx::{Connection, PgConnection};
use tracing::warn;

use crate::error::QueueError;
use crate::executor::{ExecuteError, ExportExecutor};
use crate::types::{Job, JobStatus, RunOutcome};

/// Diagnostics are bounded so a chatty executor cannot bloat the job store.
const MAX_DIAGNOSTIC_CHARS: usize = 4000;

const MIN_RUNTIME_SECS: u64 = 1;
const MAX_RUNTIME_SECS: u64 = 24 * 60 * 60;

/// Execute a claimed job and record its terminal state.
///
/// The caller has already committed `status = running`. Every executor error,
/// including a blown deadline, lands in `last_error` via the retry/exhaustion
/// path; only job-store errors propagate.
pub async fn run_job(
    conn: &mut PgConnection,
    executor: &dyn ExportExecutor,
    job_id: i64,
) -> Result<RunOutcome, QueueError> {
    // Re-check the claim under a row lock, then let the lock go again before
    // the export starts so cancel and kill can reach the row mid-run.
    let Some(job) = lock_running_job(conn, job_id).await? else {
        return Ok(RunOutcome::Skipped { job_id });
    };

    let blob_path = result_blob_path(&job, Utc::now());
    let deadline = clamp_runtime(&job);

    let result = tokio::time::timeout(
        deadline,
        executor.execute_readonly_to_blob(
            &job.query_sql,
            &job.storage_account,
            &job.storage_container,
            &blob_path,
            deadline,
        ),
    )
    .await;

    match result {
        Ok(Ok(())) => mark_succeeded(conn, job_id, &blob_path).await,
        Ok(Err(error)) => fail_or_retry(conn, &job, error.to_string()).await,
        Err(_elapsed) => {
            let diagnostic = ExecuteError::DeadlineExceeded(deadline).to_string();
            fail_or_retry(conn, &job, diagnostic).await
        }
    }
}

async fn lock_running_job(
    conn: &mut PgConnection,
    job_id: i64,
) -> Result<Option<Job>, QueueError> {
    let mut tx = conn.begin().await?;

    let job: Option<Job> = sqlx::query_as("SELECT * FROM export_jobs WHERE job_id = $1 FOR UPDATE")
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(job.filter(|job| job.status == JobStatus::Running))
}

async fn mark_succeeded(
    conn: &mut PgConnection,
    job_id: i64,
    blob_path: &str,
) -> Result<RunOutcome, QueueError> {
    let result = sqlx::query(
        r#"
UPDATE export_jobs
SET status = 'succeeded'::export_job_status,
    finished_at = NOW(),
    result_blob_path = $2,
    last_error = NULL,
    backend_pid = NULL,
    updated_at = NOW()
WHERE job_id = $1
  AND status = 'running'
        "#,
    )
    .bind(job_id)
    .bind(blob_path)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        // A kill got to the row first; its cancelled state stands.
        warn!(job_id, "export finished but the job was no longer running");
        return Ok(RunOutcome::Skipped { job_id });
    }

    Ok(RunOutcome::Succeeded {
        job_id,
        result_blob_path: blob_path.to_owned(),
    })
}

async fn fail_or_retry(
    conn: &mut PgConnection,
    job: &Job,
    diagnostic: String,
) -> Result<RunOutcome, QueueError> {
    let diagnostic = truncate_chars(&diagnostic, MAX_DIAGNOSTIC_CHARS);
    // Already incremented by the claim.
    let attempt = job.attempt_count;

    if attempt >= job.max_attempts {
        let result = sqlx::query(
            r#"
UPDATE export_jobs
SET status = 'failed'::export_job_status,
    finished_at = NOW(),
    last_error = left(concat_ws(E'\n', last_error, $2::text), 4000),
    backend_pid = NULL,
    updated_at = NOW()
WHERE job_id = $1
  AND status = 'running'
            "#,
        )
        .bind(job.job_id)
        .bind(&diagnostic)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            warn!(job_id = job.job_id, "failed job was no longer running");
            return Ok(RunOutcome::Skipped { job_id: job.job_id });
        }

        return Ok(RunOutcome::Failed { job_id: job.job_id });
    }

    let next_run = Utc::now() + retry_backoff(attempt);
    let result = sqlx::query(
        r#"
UPDATE export_jobs
SET status = 'pending'::export_job_status,
    scheduled_at = $2,
    started_at = NULL,
    finished_at = NULL,
    last_error = left(concat_ws(E'\n', last_error, $3::text), 4000),
    backend_pid = NULL,
    updated_at = NOW()
WHERE job_id = $1
  AND status = 'running'
        "#,
    )
    .bind(job.job_id)
    .bind(next_run)
    .bind(&diagnostic)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        warn!(job_id = job.job_id, "retried job was no longer running");
        return Ok(RunOutcome::Skipped { job_id: job.job_id });
    }

    Ok(RunOutcome::Retried { job_id: job.job_id })
}

/// Backoff before attempt `n + 1`: linear in the attempt count, capped at ten
/// minutes.
pub(crate) fn retry_backoff(attempt: i32) -> chrono::Duration {
    chrono::Duration::minutes(attempt.clamp(0, 10) as i64)
}

/// The per-job deadline handed to the executor, clamped into [1s, 24h]
/// whatever the row says.
fn clamp_runtime(job: &Job) -> StdDuration {
    job.max_runtime()
        .to_std()
        .unwrap_or(StdDuration::ZERO)
        .clamp(
            StdDuration::from_secs(MIN_RUNTIME_SECS),
            StdDuration::from_secs(MAX_RUNTIME_SECS),
        )
}

/// Destination for the result blob:
/// `{sanitized prefix}/{job id}/{YYYYMMDDhhmmss}.parquet`, where the prefix
/// is the correlation id (or the job id when there is none) with every
/// character outside `[A-Za-z0-9_-]` replaced by `_`.
fn result_blob_path(job: &Job, now: DateTime<Utc>) -> String {
    let prefix = match &job.correlation_id {
        Some(correlation_id) => sanitize_blob_prefix(correlation_id),
        None => job.job_id.to_string(),
    };

    format!(
        "{}/{}/{}.parquet",
        prefix,
        job.job_id,
        now.format("%Y%m%d%H%M%S")
    )
}

fn sanitize_blob_prefix(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
