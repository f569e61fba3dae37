//! Poll the export queue and drive `run_next_job` until it runs dry, from one
//! or more concurrent loops.

use std::future::ready;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use envconfig::Envconfig;
use tracing::{error, info};

use jobq_core::health::{HealthHandle, HealthRegistry};
use jobq_core::serve_metrics::{serve, setup_metrics_routes};
use jobq_core::{ExportWorker, PoolConfig, RunOutcome};

use config::Config;
use executor::HttpExportExecutor;

mod config;
mod executor;

async fn worker_loop(
    worker: Arc<ExportWorker>,
    liveness: HealthHandle,
    poll_interval: std::time::Duration,
) {
    let mut interval = tokio::time::interval(poll_interval);

    loop {
        interval.tick().await;
        liveness.report_healthy();

        // Drain the queue rather than waiting a full tick per job.
        loop {
            match worker.run_next_job().await {
                Ok(Some(outcome)) => match outcome {
                    RunOutcome::Succeeded {
                        job_id,
                        result_blob_path,
                    } => info!(job_id, %result_blob_path, "export succeeded"),
                    RunOutcome::Retried { job_id } => info!(job_id, "export attempt failed, retrying later"),
                    RunOutcome::Failed { job_id } => error!(job_id, "export failed terminally"),
                    RunOutcome::Skipped { job_id } => info!(job_id, "claimed job was already finished"),
                    RunOutcome::Abandoned { job_id } => {
                        error!(job_id, "could not record outcome; leaving job to the janitor")
                    }
                },
                Ok(None) => break,
                Err(err) => {
                    error!("failed to claim next export job: {}", err);
                    break;
                }
            }
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("failed to load configuration from env");

    let liveness = HealthRegistry::new("liveness");

    let mut pool_config = PoolConfig::new(&config.database_url);
    pool_config.max_connections = Some(config.max_pg_connections);

    let executor = Arc::new(HttpExportExecutor::new(config.executor_url.clone()));
    let identity = format!("{}-{}", config.worker_name, std::process::id());

    let worker = Arc::new(
        ExportWorker::new(pool_config, executor, &identity)
            .await
            .expect("failed to initialize export worker"),
    );

    info!(%identity, tasks = config.worker_tasks, "starting export worker");

    for task in 0..config.worker_tasks {
        // A loop may legitimately sit inside a single job for the whole of
        // its max_runtime, so the reporting deadline has to outlast the
        // 24-hour runtime ceiling.
        let handle = liveness.register(format!("worker-{task}"), time::Duration::hours(25));
        tokio::spawn(worker_loop(worker.clone(), handle, config.poll_interval.0));
    }

    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())));
    let router = setup_metrics_routes(router);

    serve(router, &config.bind())
        .await
        .expect("failed to start serving metrics");
}

pub async fn index() -> &'static str {
    "jobq worker"
}
