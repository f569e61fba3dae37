use axum::Router;
use config::Config;
use envconfig::Envconfig;
use eyre::Result;

use jobq_core::serve_metrics::setup_metrics_routes;
use jobq_core::{ExportQueue, PoolConfig};

mod config;
mod handlers;

async fn listen(app: Router, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("failed to load configuration from env");

    let mut pool_config = PoolConfig::new(&config.database_url);
    pool_config.max_connections = Some(config.max_pg_connections);

    let queue = ExportQueue::new(pool_config)
        .await
        .expect("failed to connect to the job store");

    let app = handlers::add_routes(Router::new(), queue, config.max_body_size);
    let app = setup_metrics_routes(app);

    match listen(app, config.bind()).await {
        Ok(_) => {}
        Err(e) => tracing::error!("failed to start jobq api server, {}", e),
    }
}
