//! Thin public layers over the raw queue operations, so embedders never take
//! a direct sqlx dependency: `ExportQueue` for clients, `ExportWorker` for
//! job execution, `Janitor` for operational maintenance.

use std::sync::Arc;

use chrono::Duration;
use sqlx::PgPool;
use tracing::error;

use crate::config::PoolConfig;
use crate::error::QueueError;
use crate::executor::ExportExecutor;
use crate::metrics_consts::{
    JOBS_CANCELLED, JOBS_CLAIMED, JOBS_ENQUEUED, JOBS_FAILED, JOBS_KILLED, JOBS_RETRIED,
    JOBS_SUCCEEDED, RUN_DURATION,
};
use crate::ops;
use crate::ops::claim::ClaimedJob;
use crate::slots::SLOT_LOCK_NAMESPACE;
use crate::types::{Job, NewExportJob, QueueMetrics, RunOutcome};

/// Client surface of the queue: submit, cancel and observe jobs.
#[derive(Clone)]
pub struct ExportQueue {
    pool: PgPool,
}

impl ExportQueue {
    pub async fn new(config: PoolConfig) -> Result<Self, QueueError> {
        Ok(Self {
            pool: config.connect().await?,
        })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Validate and insert a new export job, returning its assigned id.
    pub async fn enqueue(&self, new_job: NewExportJob) -> Result<i64, QueueError> {
        let job_id = ops::enqueue::enqueue_job(&self.pool, new_job).await?;
        metrics::counter!(JOBS_ENQUEUED).increment(1);
        Ok(job_id)
    }

    /// Cancel a pending job. Returns true iff a row was cancelled; a job that
    /// already left pending (or is being claimed right now) returns false.
    pub async fn cancel(&self, job_id: i64) -> Result<bool, QueueError> {
        let cancelled = ops::maintenance::cancel_job(&self.pool, job_id).await?;
        if cancelled {
            metrics::counter!(JOBS_CANCELLED).increment(1);
        }
        Ok(cancelled)
    }

    pub async fn job(&self, job_id: i64) -> Result<Job, QueueError> {
        ops::meta::get_job(&self.pool, job_id)
            .await?
            .ok_or(QueueError::NotFound(job_id))
    }

    pub async fn queue_metrics(&self) -> Result<QueueMetrics, QueueError> {
        ops::meta::queue_metrics(&self.pool).await
    }

    pub async fn schema_version(&self) -> Result<Option<String>, QueueError> {
        ops::meta::schema_version(&self.pool).await
    }
}

/// The worker surface: a single-shot entry point that any timer or process
/// pool can drive concurrently from N processes.
#[derive(Clone)]
pub struct ExportWorker {
    pool: PgPool,
    executor: Arc<dyn ExportExecutor>,
    identity: String,
    slot_namespace: i32,
}

impl ExportWorker {
    pub async fn new(
        config: PoolConfig,
        executor: Arc<dyn ExportExecutor>,
        identity: &str,
    ) -> Result<Self, QueueError> {
        Ok(Self::from_pool(config.connect().await?, executor, identity))
    }

    pub fn from_pool(pool: PgPool, executor: Arc<dyn ExportExecutor>, identity: &str) -> Self {
        Self {
            pool,
            executor,
            identity: identity.to_owned(),
            slot_namespace: SLOT_LOCK_NAMESPACE,
        }
    }

    /// Use a different advisory-lock namespace for the slot semaphore, for
    /// running several independent queues against one Postgres cluster.
    pub fn with_slot_namespace(mut self, namespace: i32) -> Self {
        self.slot_namespace = namespace;
        self
    }

    /// Claim and execute at most one job.
    ///
    /// The claim commits first, so `running` is visible to monitoring and the
    /// orphan detector before the long-running work starts; the terminal
    /// status is written in a separate transaction. Returns `Ok(None)` when
    /// there is nothing to do (empty queue, no free slot, or no connection
    /// headroom).
    pub async fn run_next_job(&self) -> Result<Option<RunOutcome>, QueueError> {
        let Some(claimed) =
            ops::claim::claim_next_job(&self.pool, self.slot_namespace, &self.identity).await?
        else {
            return Ok(None);
        };

        let ClaimedJob { job, mut slot } = claimed;
        metrics::counter!(JOBS_CLAIMED).increment(1);
        let started = std::time::Instant::now();

        let result = ops::runner::run_job(slot.connection(), self.executor.as_ref(), job.job_id)
            .await;

        // Exactly once, success or not. Leaking a slot starves the cluster.
        slot.release().await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(error) => {
                // The job store refused the terminal write. The row is still
                // `running` and the orphan detector will recover it once this
                // session is gone.
                error!(
                    job_id = job.job_id,
                    %error,
                    "failed to record a terminal status for claimed job"
                );
                RunOutcome::Abandoned { job_id: job.job_id }
            }
        };

        metrics::histogram!(RUN_DURATION).record(started.elapsed().as_secs_f64());
        match &outcome {
            RunOutcome::Succeeded { .. } => metrics::counter!(JOBS_SUCCEEDED).increment(1),
            RunOutcome::Retried { .. } => metrics::counter!(JOBS_RETRIED).increment(1),
            RunOutcome::Failed { .. } => metrics::counter!(JOBS_FAILED).increment(1),
            RunOutcome::Skipped { .. } | RunOutcome::Abandoned { .. } => {}
        }

        Ok(Some(outcome))
    }
}

/// Maintenance surface, normally driven by a single janitor process per
/// cluster.
#[derive(Clone)]
pub struct Janitor {
    pool: PgPool,
}

impl Janitor {
    pub async fn new(config: PoolConfig) -> Result<Self, QueueError> {
        Ok(Self {
            pool: config.connect().await?,
        })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) {
        ops::meta::run_migrations(&self.pool).await;
    }

    /// Requeue (or fail, when attempts are exhausted) up to `limit` running
    /// jobs whose worker process has disappeared. Returns the number acted
    /// upon.
    pub async fn requeue_orphaned_running_jobs(&self, limit: i64) -> Result<u64, QueueError> {
        ops::maintenance::requeue_orphaned_jobs(&self.pool, limit).await
    }

    /// Delete one bounded batch of rows finished longer than `older_than`
    /// ago. Repeat until it returns zero.
    pub async fn purge_old_jobs(
        &self,
        older_than: Duration,
        limit: i64,
    ) -> Result<u64, QueueError> {
        ops::maintenance::purge_old_jobs(&self.pool, older_than, limit).await
    }

    /// Best-effort kill of a running job; see `ops::maintenance::kill_job`.
    pub async fn kill(&self, job_id: i64) -> Result<bool, QueueError> {
        let terminated = ops::maintenance::kill_job(&self.pool, job_id).await?;
        metrics::counter!(JOBS_KILLED).increment(1);
        Ok(terminated)
    }

    pub async fn schema_version(&self) -> Result<Option<String>, QueueError> {
        ops::meta::schema_version(&self.pool).await
    }
}
