//! Maintenance daemon: requeue orphaned running jobs and purge finished rows
//! past the retention window, on a fixed interval.

use std::future::ready;
use std::time::Duration;

use axum::{extract::State, routing::get, Router};
use envconfig::Envconfig;
use eyre::Result;
use tracing::{error, info, warn};

use jobq_core::health::{HealthHandle, HealthRegistry};
use jobq_core::metrics_consts::{JOBS_ORPHAN_REQUEUED, JOBS_PURGED};
use jobq_core::serve_metrics::setup_metrics_routes;
use jobq_core::{Janitor, QueueError};

use config::{Config, JanitorSettings};

mod config;

async fn run_once(janitor: &Janitor, settings: &JanitorSettings) -> Result<(), QueueError> {
    let requeued = janitor
        .requeue_orphaned_running_jobs(settings.orphan_requeue_limit)
        .await?;
    metrics::counter!(JOBS_ORPHAN_REQUEUED).increment(requeued);
    if requeued > 0 {
        warn!(requeued, "requeued orphaned running jobs");
    }

    // Bounded batches until the backlog is gone.
    let mut purged = 0;
    loop {
        let batch = janitor
            .purge_old_jobs(settings.retention, settings.purge_batch_size)
            .await?;
        purged += batch;
        if batch == 0 {
            break;
        }
    }
    metrics::counter!(JOBS_PURGED).increment(purged);

    info!(requeued, purged, "janitor pass complete");

    Ok(())
}

async fn cleanup_loop(
    janitor: Janitor,
    settings: JanitorSettings,
    liveness: HealthHandle,
    interval_secs: u64,
) -> Result<()> {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        if let Err(e) = run_once(&janitor, &settings).await {
            // A few failed passes in a row will show up as a stalled liveness
            // component; no need to report unhealthy explicitly.
            error!("janitor failed cleanup with: {}", e);
        } else {
            liveness.report_healthy();
        }
    }
}

async fn listen(app: Router, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, app).await?;

    Ok(())
}

// For axum's state stuff
#[derive(Clone)]
struct JanitorId(pub String);

pub fn app(liveness: HealthRegistry, janitor_id: String) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())))
        .with_state(JanitorId(janitor_id))
}

async fn index(State(janitor_id): State<JanitorId>) -> String {
    format!("jobq janitor {}", janitor_id.0)
}

#[tokio::main]
async fn main() {
    let config = Config::init_from_env().expect("failed to load configuration from env");
    tracing_subscriber::fmt::init();

    let liveness = HealthRegistry::new("liveness");

    let settings = config.settings();
    let janitor_id = settings.id.clone();
    let bind = config.bind();

    info!(
        "Starting janitor with ID {:?}, listening at {}",
        janitor_id, bind
    );

    let janitor = Janitor::new(config.pool_config())
        .await
        .expect("failed to create janitor");

    janitor.run_migrations().await;

    let janitor_liveness = liveness.register(
        "janitor".to_string(),
        time::Duration::seconds(config.cleanup_interval_secs as i64 * 4),
    );

    let janitor_loop = tokio::spawn(cleanup_loop(
        janitor,
        settings,
        janitor_liveness,
        config.cleanup_interval_secs,
    ));

    let app = setup_metrics_routes(app(liveness, janitor_id));
    let http_server = tokio::spawn(listen(app, bind));

    tokio::select! {
        res = janitor_loop => {
            error!("janitor loop exited");
            if let Err(e) = res {
                error!("janitor failed with: {}", e)
            }
        }
        res = http_server => {
            error!("http server exited");
            if let Err(e) = res {
                error!("server failed with: {}", e)
            }
        }
    }

    info!("exiting");
}
