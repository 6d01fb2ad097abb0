//! Harvester API Gateway
//!
//! The admin surface for the run orchestration subsystem. Handles:
//! - Account-scoped job, schedule, and mapping management
//! - The on-demand run-job action
//! - Read-only run and discovered-file listings
//! - Observability (logging, metrics, tracing)

mod handlers;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use harvester_common::{
    config::AppConfig,
    db::DbPool,
    dispatch::{Dispatcher, RunFactory},
    metrics::register_metrics,
    queue::QueueSet,
    Repository, VERSION,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, Level};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub repo: Repository,
    pub factory: RunFactory,
    pub dispatcher: Dispatcher,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(true)
        .json()
        .init();

    info!("Starting Harvester API Gateway v{}", VERSION);

    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;
    let config = Arc::new(config);

    if config.observability.metrics_port > 0 {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], config.observability.metrics_port))
            .install()?;
        register_metrics();
    }

    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    let repo = Repository::new(db);

    let queues = QueueSet::from_config(&config.queue).await;
    let factory = RunFactory::new(
        repo.clone(),
        config.runs.start_offset_days,
        config.runs.end_offset_days,
    );
    let dispatcher = Dispatcher::new(repo.clone(), queues, &config.dispatch);

    let state = AppState {
        config: config.clone(),
        repo,
        factory,
        dispatcher,
    };

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let api_routes = Router::new()
        // Health endpoints (no account scoping)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        // Connector catalogue
        .route("/connectors", get(handlers::connectors::list_connectors))
        .route("/connectors/{id}", get(handlers::connectors::get_connector))
        // Job management
        .route("/jobs", get(handlers::jobs::list_jobs))
        .route("/jobs", post(handlers::jobs::create_job))
        .route("/jobs/{id}", get(handlers::jobs::get_job))
        .route("/jobs/{id}", delete(handlers::jobs::delete_job))
        .route("/jobs/{id}/credentials", put(handlers::jobs::update_credentials))
        .route("/jobs/{id}/schedules", get(handlers::jobs::list_schedules))
        .route("/jobs/{id}/schedules", post(handlers::jobs::create_schedule))
        .route("/jobs/{id}/mappings", post(handlers::jobs::create_mapping))
        // Run-job action and run listings
        .route("/jobs/{id}/run", post(handlers::jobs::run_job))
        .route("/jobs/{id}/runs", get(handlers::runs::list_runs))
        .route("/runs/{id}", get(handlers::runs::get_run))
        .route("/runs/{id}/files", get(handlers::files::list_run_files));

    Router::new()
        .nest("/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
