use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::Semaphore;

use jobq_core::{ExecuteError, ExportExecutor, NewExportJob};

/// Scriptable stand-in for the external query executor.
///
/// By default every invocation succeeds. A script queues per-call results, a
/// gate makes calls block until the test hands out permits, and a delay makes
/// every call sleep (for exercising the deadline).
#[derive(Default)]
pub struct StubExecutor {
    calls: AtomicUsize,
    script: Mutex<VecDeque<Result<(), ExecuteError>>>,
    gate: Option<Arc<Semaphore>>,
    delay: Option<Duration>,
    seen_blob_paths: Mutex<Vec<String>>,
}

#[allow(dead_code)] // each test binary only uses a subset of the helpers
impl StubExecutor {
    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn scripted(results: Vec<Result<(), ExecuteError>>) -> Self {
        Self {
            script: Mutex::new(results.into()),
            ..Default::default()
        }
    }

    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen_blob_paths(&self) -> Vec<String> {
        self.seen_blob_paths
            .lock()
            .expect("blob path lock poisoned")
            .clone()
    }

    /// Poll until the executor has seen at least `count` calls.
    pub async fn wait_for_calls(&self, count: usize) {
        for _ in 0..200 {
            if self.calls() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("executor never reached {count} calls");
    }
}

#[async_trait]
impl ExportExecutor for StubExecutor {
    async fn execute_readonly_to_blob(
        &self,
        _query_sql: &str,
        _storage_account: &str,
        _storage_container: &str,
        blob_path: &str,
        _deadline: Duration,
    ) -> Result<(), ExecuteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_blob_paths
            .lock()
            .expect("blob path lock poisoned")
            .push(blob_path.to_owned());

        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self
            .script
            .lock()
            .expect("script lock poisoned")
            .pop_front()
        {
            Some(result) => result,
            None => Ok(()),
        }
    }
}

#[allow(dead_code)]
pub fn new_export(query_sql: &str) -> NewExportJob {
    NewExportJob::new(query_sql, "exports-account", "exports-container")
}

/// Pull a retried job's next run back to now so a test can re-claim it
/// without sleeping through the backoff.
#[allow(dead_code)]
pub async fn make_runnable(pool: &PgPool, job_id: i64) {
    sqlx::query("UPDATE export_jobs SET scheduled_at = NOW() WHERE job_id = $1")
        .bind(job_id)
        .execute(pool)
        .await
        .expect("failed to reset scheduled_at");
}

/// Force a row into `running` as if a worker (possibly one that no longer
/// exists) had claimed it.
#[allow(dead_code)]
pub async fn fake_running(pool: &PgPool, job_id: i64, backend_pid: Option<i32>) {
    sqlx::query(
        r#"
UPDATE export_jobs
SET status = 'running', started_at = NOW(), attempt_count = attempt_count + 1, backend_pid = $2
WHERE job_id = $1
        "#,
    )
    .bind(job_id)
    .bind(backend_pid)
    .execute(pool)
    .await
    .expect("failed to force job into running");
}

#[allow(dead_code)]
pub async fn count_by_status(pool: &PgPool, status: &str) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM export_jobs WHERE status = $1::export_job_status")
        .bind(status)
        .fetch_one(pool)
        .await
        .expect("failed to count jobs")
}
