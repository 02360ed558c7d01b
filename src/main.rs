mod app_state;
mod config;
mod models;
mod pipeline;
mod providers;
mod routes;
mod services;
mod worker;

use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use app_state::AppState;
use config::AppConfig;
use providers::ProviderRegistry;
use services::{
    queue::JobQueue, resolver::ImageResolver, state_store::StateStore, validator::ValidatorClient,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing jarvis-ocr-service");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!("ocr_jobs_total", "Total OCR jobs consumed from the input queue");
    metrics::describe_counter!("ocr_jobs_completed", "Jobs that emitted a success completion");
    metrics::describe_counter!("ocr_jobs_failed", "Jobs that emitted a failed completion");
    metrics::describe_counter!(
        "ocr_validations_enqueued",
        "Validation requests sent to the LLM proxy"
    );
    metrics::describe_counter!(
        "ocr_validation_timeouts",
        "Pending validations that expired without a callback"
    );
    metrics::describe_gauge!("ocr_queue_depth", "Jobs waiting on the input queue");
    metrics::describe_histogram!(
        "ocr_job_duration_seconds",
        "Time from job creation to completion emit"
    );

    // Initialize Redis-backed queue and state store
    tracing::info!("Connecting to Redis at {}:{}", config.redis_host, config.redis_port);
    let queue = JobQueue::new(&config.redis_url()).expect("Failed to initialize job queue");
    queue
        .health_check()
        .await
        .expect("Redis not reachable, cannot process jobs");

    let state_store = StateStore::new(&config.redis_url(), config.validation_state_ttl())
        .expect("Failed to initialize state store");

    // Initialize collaborator clients
    let validator = ValidatorClient::new(&config);
    let resolver = ImageResolver::new(&config);

    // Probe OCR engines and fix the active cascade for this host
    tracing::info!("Probing OCR tiers: {}", config.ocr_enabled_tiers);
    let providers = ProviderRegistry::bootstrap(&config)
        .await
        .expect("No usable OCR tier on this host");
    tracing::info!(tiers = ?providers.active_tiers(), "Active tier cascade");

    tracing::info!(
        "Configuration: max_text_bytes={}, max_attempts={}, state_ttl={}s",
        config.ocr_max_text_bytes,
        config.ocr_max_attempts,
        config.ocr_validation_state_ttl_seconds
    );

    let bind_addr = config.ocr_bind_addr.clone();
    let state = AppState::new(config, queue, state_store, validator, resolver, providers);

    // Build callback/health routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route(
            "/internal/validation/callback",
            post(routes::callback::validation_callback),
        )
        .with_state(state.clone())
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(1024 * 1024)); // 1 MB: verdicts are small

    // Worker loop and sweeper run beside the callback server; a watch
    // channel fans the shutdown signal out to all of them.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let drain_deadline = state.config.shutdown_deadline();
    let mut drain_rx = shutdown_rx.clone();
    let worker_handle = tokio::spawn(worker::run(state.clone(), shutdown_rx.clone()));
    let sweeper_handle = tokio::spawn(worker::run_sweeper(state, shutdown_rx));

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Callback server listening on {}", bind_addr);

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal(shutdown_tx));

    // The drain is bounded: connections still open past the deadline are
    // dropped instead of holding shutdown hostage.
    tokio::select! {
        result = server => result.expect("Server error"),
        _ = async {
            let _ = drain_rx.wait_for(|stopping| *stopping).await;
            tokio::time::sleep(drain_deadline).await;
        } => {
            tracing::warn!(
                deadline_secs = drain_deadline.as_secs(),
                "Drain deadline exceeded, forcing callback server down"
            );
        }
    }

    // Suspended jobs survive in the state store; whoever receives their
    // callback (or the TTL sweep after restart) resumes them.
    let _ = worker_handle.await;
    let _ = sweeper_handle.await;
    tracing::info!("Shutdown complete");
}

/// Resolve on SIGTERM or ctrl-c and propagate the shutdown to the worker
/// tasks before axum starts draining.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Termination signal received, draining");
    let _ = shutdown_tx.send(true);
}
