pub mod error;
pub mod health;
pub mod i3s;
pub mod jobs;
pub mod metrics;
pub mod upload;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

/// Body limit for every route except uploads, which enforce their own limit while streaming.
const SMALL_BODY_LIMIT: usize = 64 * 1024;

/// Application routes. `/metrics` is added by the binary, which owns the recorder.
pub fn build_router(state: AppState) -> Router {
    let uploads_root = state.dispatcher.storage().root().to_path_buf();

    let upload_routes = Router::new()
        .route("/api/upload-model", post(upload::upload_model))
        .layer(DefaultBodyLimit::disable());

    let read_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/api/jobs/{job_id}", get(jobs::get_job))
        .route("/i3s/{folder}", get(i3s::service_root))
        .route("/i3s/{folder}/{*path}", get(i3s::resource))
        .layer(RequestBodyLimitLayer::new(SMALL_BODY_LIMIT));

    Router::new()
        .merge(upload_routes)
        .merge(read_routes)
        .nest_service("/uploads", ServeDir::new(uploads_root))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
