use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use jobq_core::metrics_consts::ENQUEUE_DURATION;
use jobq_core::{ExportQueue, Job, NewExportJob, QueueError, QueueMetrics};

/// The body of a request made to create an export job.
#[derive(Deserialize, Debug)]
pub struct ExportPostRequestBody {
    query_sql: String,
    storage_account: String,
    storage_container: String,
    #[serde(default)]
    scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    priority: Option<i32>,
    #[serde(default)]
    correlation_id: Option<String>,
    #[serde(default)]
    max_runtime_seconds: Option<i64>,
    #[serde(default)]
    max_attempts: Option<i32>,
}

#[derive(Serialize)]
pub struct ExportPostResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    job_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Projection of a job row for API consumers; the query text is echoed back
/// but internals like the backend pid are not.
#[derive(Serialize)]
pub struct ExportJobResponse {
    job_id: i64,
    status: jobq_core::JobStatus,
    query_sql: String,
    storage_account: String,
    storage_container: String,
    result_blob_path: Option<String>,
    scheduled_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    priority: i32,
    correlation_id: Option<String>,
    attempt_count: i32,
    max_attempts: i32,
    last_error: Option<String>,
}

impl From<Job> for ExportJobResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.job_id,
            status: job.status,
            query_sql: job.query_sql,
            storage_account: job.storage_account,
            storage_container: job.storage_container,
            result_blob_path: job.result_blob_path,
            scheduled_at: job.scheduled_at,
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            priority: job.priority,
            correlation_id: job.correlation_id,
            attempt_count: job.attempt_count,
            max_attempts: job.max_attempts,
            last_error: job.last_error,
        }
    }
}

pub async fn create(
    State(queue): State<ExportQueue>,
    Json(payload): Json<ExportPostRequestBody>,
) -> Result<Json<ExportPostResponse>, (StatusCode, Json<ExportPostResponse>)> {
    debug!("received export request: {:?}", payload);

    let new_job = NewExportJob {
        query_sql: payload.query_sql,
        storage_account: payload.storage_account,
        storage_container: payload.storage_container,
        scheduled_at: payload.scheduled_at,
        priority: payload.priority,
        correlation_id: payload.correlation_id,
        max_runtime: payload.max_runtime_seconds.map(Duration::seconds),
        max_attempts: payload.max_attempts,
    };

    let start_time = Instant::now();

    let job_id = match queue.enqueue(new_job).await {
        Ok(job_id) => job_id,
        Err(QueueError::InvalidArgument(message)) => return Err(bad_request(&message)),
        Err(error) => return Err(internal_error(error)),
    };

    metrics::histogram!(ENQUEUE_DURATION).record(start_time.elapsed().as_secs_f64());

    Ok(Json(ExportPostResponse {
        job_id: Some(job_id),
        error: None,
    }))
}

pub async fn show(
    State(queue): State<ExportQueue>,
    Path(job_id): Path<i64>,
) -> Result<Json<ExportJobResponse>, (StatusCode, Json<ExportPostResponse>)> {
    match queue.job(job_id).await {
        Ok(job) => Ok(Json(job.into())),
        Err(QueueError::NotFound(_)) => Err(not_found(job_id)),
        Err(error) => Err(internal_error(error)),
    }
}

#[derive(Serialize)]
pub struct CancelResponse {
    cancelled: bool,
}

pub async fn cancel(
    State(queue): State<ExportQueue>,
    Path(job_id): Path<i64>,
) -> Result<Json<CancelResponse>, (StatusCode, Json<ExportPostResponse>)> {
    match queue.cancel(job_id).await {
        Ok(cancelled) => Ok(Json(CancelResponse { cancelled })),
        Err(QueueError::NotFound(_)) => Err(not_found(job_id)),
        Err(error) => Err(internal_error(error)),
    }
}

pub async fn queue_metrics(
    State(queue): State<ExportQueue>,
) -> Result<Json<QueueMetrics>, (StatusCode, Json<ExportPostResponse>)> {
    match queue.queue_metrics().await {
        Ok(metrics) => Ok(Json(metrics)),
        Err(error) => Err(internal_error(error)),
    }
}

fn error_body(error: Option<String>) -> Json<ExportPostResponse> {
    Json(ExportPostResponse {
        job_id: None,
        error,
    })
}

fn bad_request(msg: &str) -> (StatusCode, Json<ExportPostResponse>) {
    error!(msg);
    (StatusCode::BAD_REQUEST, error_body(Some(msg.to_owned())))
}

fn not_found(job_id: i64) -> (StatusCode, Json<ExportPostResponse>) {
    (
        StatusCode::NOT_FOUND,
        error_body(Some(format!("no export job with id {job_id}"))),
    )
}

fn internal_error<E>(err: E) -> (StatusCode, Json<ExportPostResponse>)
where
    E: std::error::Error,
{
    error!("internal error: {}", err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        error_body(Some(err.to_string())),
    )
}
