use sqlx::postgres::types::PgInterval;

use crate::admission;
use crate::error::QueueError;
use crate::types::NewExportJob;

/// Validate, normalize and insert a new export job, returning its assigned id.
pub async fn enqueue_job<'c, E>(executor: E, new_job: NewExportJob) -> Result<i64, QueueError>
where
    E: sqlx::Executor<'c, Database = sqlx::Postgres>,
{
    let admitted = admission::admit(new_job)?;

    let max_runtime = PgInterval::try_from(admitted.max_runtime)
        .map_err(|_| QueueError::InvalidArgument("max_runtime is not representable".to_owned()))?;

    let job_id: i64 = sqlx::query_scalar(
        r#"
INSERT INTO export_jobs
    (query_sql, storage_account, storage_container, scheduled_at, priority,
     correlation_id, status, attempt_count, max_attempts, max_runtime)
VALUES
    ($1, $2, $3, $4, $5, $6, 'pending'::export_job_status, 0, $7, $8)
RETURNING job_id
        "#,
    )
    .bind(&admitted.query_sql)
    .bind(&admitted.storage_account)
    .bind(&admitted.storage_container)
    .bind(admitted.scheduled_at)
    .bind(admitted.priority)
    .bind(&admitted.correlation_id)
    .bind(admitted.max_attempts)
    .bind(max_runtime)
    .fetch_one(executor)
    .await?;

    Ok(job_id)
}
