use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// GET /metrics — Prometheus text exposition of upload, conversion and I3S counters.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
}

/// Register descriptions for every metric the service records.
pub fn describe_metrics() {
    metrics::describe_counter!("uploads_total", "Uploads accepted, by strategy");
    metrics::describe_counter!(
        "upload_rejections_total",
        "Uploads rejected at the boundary, by reason"
    );
    metrics::describe_counter!("upload_jobs_completed", "Upload jobs that reached done");
    metrics::describe_counter!(
        "upload_jobs_failed",
        "Upload jobs that reached error, by strategy and kind"
    );
    metrics::describe_histogram!(
        "upload_processing_seconds",
        "Time from job start to terminal state"
    );
    metrics::describe_counter!(
        "conversion_tool_runs_total",
        "External converter runs, by tool and outcome"
    );
    metrics::describe_counter!("i3s_requests_total", "I3S path resolutions, by outcome");
    metrics::describe_gauge!("upload_jobs_tracked", "Jobs held by the in-memory job store");
}
