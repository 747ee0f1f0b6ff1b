use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::app_state::AppState;
use crate::services::executor::is_available;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
    /// Converter binary availability. Missing converters degrade to raw
    /// fallbacks, so they do not affect `status`.
    pub converters: BTreeMap<String, bool>,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub job_store: ComponentHealth,
    pub uploads_dir: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

impl ComponentHealth {
    fn ok(start: std::time::Instant) -> Self {
        Self {
            status: "ok".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
        }
    }

    fn error() -> Self {
        Self {
            status: "error".to_string(),
            latency_ms: None,
        }
    }
}

/// GET /health — job store, uploads directory and converter status.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let start = std::time::Instant::now();
    let job_store = match state.jobs.health_check().await {
        Ok(_) => ComponentHealth::ok(start),
        Err(e) => {
            tracing::warn!(error = %e, "Job store health check failed");
            ComponentHealth::error()
        }
    };

    let uploads_start = std::time::Instant::now();
    let uploads_dir = match tokio::fs::metadata(state.dispatcher.storage().root()).await {
        Ok(meta) if meta.is_dir() => ComponentHealth::ok(uploads_start),
        _ => ComponentHealth::error(),
    };

    let mut converters = BTreeMap::new();
    for (name, binary) in state.converter_binaries.iter() {
        converters.insert(name.to_string(), is_available(binary).await);
    }

    let all_healthy = job_store.status == "ok" && uploads_dir.status == "ok";
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            job_store,
            uploads_dir,
        },
        converters,
    };

    (status_code, Json(response))
}
