use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use asset_ingest::{
    app_state::AppState,
    config::{AppConfig, JobStoreBackend},
    routes::{self, metrics::describe_metrics},
    services::{
        converters::ConverterSet,
        dispatcher::Dispatcher,
        formats::FormatRegistry,
        job_store::{InMemoryJobStore, JobStore, RedisJobStore},
        storage::UploadStorage,
    },
};

const EVICTION_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing asset-ingest server");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    describe_metrics();

    let storage = UploadStorage::new(&config.uploads_dir);
    storage
        .ensure_root()
        .await
        .expect("Failed to create uploads directory");
    tracing::info!(dir = %storage.root().display(), "Uploads directory ready");

    let jobs: Arc<dyn JobStore> = match config.job_store {
        JobStoreBackend::Memory => {
            let store = Arc::new(InMemoryJobStore::new(config.job_ttl()));
            spawn_eviction(store.clone());
            tracing::info!(ttl_secs = config.job_ttl_secs, "Using in-memory job store");
            store
        }
        JobStoreBackend::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .expect("REDIS_URL validated for the redis job store");
            tracing::info!("Connecting to Redis job store");
            Arc::new(RedisJobStore::new(url, config.job_ttl()).expect("Failed to initialize Redis job store"))
        }
    };

    let formats = match config.allowed_extensions() {
        Some(list) => FormatRegistry::with_allow_list(list),
        None => FormatRegistry::new(),
    };
    tracing::info!(extensions = ?formats.allowed_extensions(), "Format allow-list loaded");

    let dispatcher = Dispatcher::new(
        storage,
        ConverterSet::from_config(&config),
        config.extraction_limits(),
    );

    let state = AppState::new(
        jobs,
        formats,
        dispatcher,
        config.max_upload_bytes,
        ConverterSet::binaries(&config),
    );

    let app: Router = routes::build_router(state).route(
        "/metrics",
        get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
    );

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    tracing::info!("Server stopped");
}

/// Periodically drop finished jobs older than the TTL.
fn spawn_eviction(store: Arc<InMemoryJobStore>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(EVICTION_INTERVAL);
        loop {
            ticker.tick().await;
            let evicted = store.evict_expired().await;
            if evicted > 0 {
                tracing::info!(evicted, "Evicted expired jobs");
            }
            metrics::gauge!("upload_jobs_tracked").set(store.len().await as f64);
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
