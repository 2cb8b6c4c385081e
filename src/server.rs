use anyhow::{Context, Result};
use axum::{routing::get, Router};
use std::{net::SocketAddr, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    cluster::{ClusterClient, KubeClusterClient},
    collector::Engine,
    config::Config,
    handlers::{self, AppState},
    metrics,
    signals::setup_signal_handlers,
};

/// Start the metrics engine and its HTTP API
///
/// This function:
/// 1. Initializes self-metrics
/// 2. Sets up signal handlers for graceful shutdown
/// 3. Builds and starts the engine
/// 4. Serves requests until a shutdown signal arrives
/// 5. Shuts the engine down (pollers, queue, stores)
pub async fn start_server(config: Config) -> Result<()> {
    let client: Arc<dyn ClusterClient> = Arc::new(KubeClusterClient::from_config(&config.cluster));
    serve(config, client).await
}

/// Same as [`start_server`] with a caller-provided cluster client
pub async fn serve(config: Config, client: Arc<dyn ClusterClient>) -> Result<()> {
    info!("Initializing Prometheus metrics...");
    let prometheus = metrics::init_metrics().map(Arc::new);

    let (shutdown_tx, signal_handle) = setup_signal_handlers();
    let mut shutdown_rx = shutdown_tx.subscribe();

    let engine = Arc::new(
        Engine::new(&config, client)
            .await
            .context("Failed to initialize metrics engine")?,
    );
    engine.start().await;

    let app = create_router(AppState {
        engine: engine.clone(),
        prometheus,
    });

    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    info!("Starting fleet-metrics on {}", addr);
    info!(
        "Configuration: {} applications, poll every {}ms, data in {}",
        config.collector.applications.len(),
        config.collector.poll_interval_ms,
        config.collector.data_dir.display()
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("Shutdown signal received, draining connections...");
        })
        .await;

    // The engine is stopped even if serving failed
    engine.shutdown().await;
    signal_handle.abort();
    served?;

    info!("Server stopped gracefully");
    Ok(())
}

/// Create the Axum router with all routes and middleware
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/internal/metrics", get(handlers::metrics_handler::metrics))
        .route(
            "/api/v1/metrics/:application",
            get(handlers::metrics_api::application_metrics),
        )
        .route(
            "/api/v1/metrics/:application/:pod",
            get(handlers::metrics_api::pod_metrics),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
