use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::postgres::types::PgInterval;

use crate::error::QueueError;

/// Enumeration of possible statuses for an export job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "export_job_status", rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in the queue until `scheduled_at` for a worker to claim it.
    Pending,
    /// Claimed by a worker and currently executing.
    Running,
    /// The export finished and its result blob path was recorded.
    Succeeded,
    /// The attempt budget is exhausted. Terminal.
    Failed,
    /// Cancelled before running, or killed while running. Terminal.
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Allow casting JobStatus from strings.
impl FromStr for JobStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            invalid => Err(QueueError::InvalidArgument(format!(
                "{invalid} is not a valid job status"
            ))),
        }
    }
}

/// A durable export job row. The job store is the sole source of truth; this
/// struct is only ever a snapshot of it.
#[derive(Debug, sqlx::FromRow)]
pub struct Job {
    /// A unique, monotonically increasing id identifying a job.
    pub job_id: i64,
    /// The validated read-only query to export.
    pub query_sql: String,
    pub storage_account: String,
    pub storage_container: String,
    /// Path of the result blob within the container. Populated on success.
    pub result_blob_path: Option<String>,
    /// The earliest time the job may run. Pushed into the future on retry.
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Higher priority runs first; ties resolve to earlier `scheduled_at`,
    /// then smaller `job_id`.
    pub priority: i32,
    /// Opaque client tag, also used as the result blob path prefix.
    pub correlation_id: Option<String>,
    pub status: JobStatus,
    /// Number of claims so far; never exceeds `max_attempts`.
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub(crate) max_runtime: PgInterval,
    /// Accumulated diagnostics across attempts, newest last.
    pub last_error: Option<String>,
    /// Identity of the worker that most recently claimed the job.
    pub run_by: Option<String>,
    /// Postgres backend pid of the session currently executing the job.
    pub backend_pid: Option<i32>,
}

impl Job {
    /// The per-job wall-clock deadline. Stored as a Postgres INTERVAL, which
    /// sqlx only decodes into its raw months/days/microseconds form.
    pub fn max_runtime(&self) -> Duration {
        Duration::days(self.max_runtime.months as i64 * 30 + self.max_runtime.days as i64)
            + Duration::microseconds(self.max_runtime.microseconds)
    }
}

/// The chunk of data needed to enqueue an export job. Optional fields fall
/// back to the queue's defaults at admission.
#[derive(Debug, Clone, Default)]
pub struct NewExportJob {
    pub query_sql: String,
    pub storage_account: String,
    pub storage_container: String,
    /// Earliest run time; `None` means now.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// In [-1000, 1000]; `None` means 0.
    pub priority: Option<i32>,
    pub correlation_id: Option<String>,
    /// In (0, 24h]; `None` means 30 minutes.
    pub max_runtime: Option<Duration>,
    /// At least 1; `None` means the configured default.
    pub max_attempts: Option<i32>,
}

impl NewExportJob {
    pub fn new(query_sql: &str, storage_account: &str, storage_container: &str) -> Self {
        Self {
            query_sql: query_sql.to_owned(),
            storage_account: storage_account.to_owned(),
            storage_container: storage_container.to_owned(),
            ..Default::default()
        }
    }
}

/// What a single `run_next_job` invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The export finished and the result blob path was recorded.
    Succeeded { job_id: i64, result_blob_path: String },
    /// The attempt failed; the job went back to pending with a backoff.
    Retried { job_id: i64 },
    /// The attempt failed and exhausted the attempt budget.
    Failed { job_id: i64 },
    /// The claimed row was gone or no longer running by the time the runner
    /// looked at it (a cancel or kill won the race).
    Skipped { job_id: i64 },
    /// The runner could not record a terminal status; the orphan detector
    /// will pick the row back up.
    Abandoned { job_id: i64 },
}

impl RunOutcome {
    pub fn job_id(&self) -> i64 {
        match self {
            RunOutcome::Succeeded { job_id, .. }
            | RunOutcome::Retried { job_id }
            | RunOutcome::Failed { job_id }
            | RunOutcome::Skipped { job_id }
            | RunOutcome::Abandoned { job_id } => *job_id,
        }
    }
}

/// Read-only aggregate snapshot over the job store.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct QueueMetrics {
    pub pending: i64,
    pub running: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub cancelled: i64,
    /// Longest wait among runnable pending jobs, measured from `scheduled_at`.
    pub oldest_pending_wait_seconds: Option<f64>,
    pub avg_pending_wait_seconds: Option<f64>,
}
