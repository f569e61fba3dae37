use axum::{routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

const SECONDS_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0, 1800.0,
];

/// Install the global Prometheus recorder. Call once per process, before any
/// metric is recorded.
pub fn setup_metrics_recorder() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets(SECONDS_BUCKETS)
        .expect("bucket list is non-empty")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Add a `/metrics` route rendering the process' Prometheus registry.
pub fn setup_metrics_routes(router: Router) -> Router {
    let handle = setup_metrics_recorder();

    router.route(
        "/metrics",
        get(move || std::future::ready(handle.render())),
    )
}

/// Bind a `TcpListener` on `bind` and serve the router on it.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router).await?;

    Ok(())
}
