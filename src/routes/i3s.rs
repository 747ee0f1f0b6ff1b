use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::path::PathBuf;
use tokio_util::io::ReaderStream;

use crate::app_state::AppState;
use crate::routes::error::ApiError;
use crate::services::extraction::gunzip_stream;
use crate::services::i3s_resolver::{self, AssetNotFound, ResolvedAsset};

static RESOLVED_PATH_HEADER: HeaderName = HeaderName::from_static("x-i3s-resolved-path");

/// GET /i3s/{folder} — service root of an extracted package.
pub async fn service_root(State(state): State<AppState>, Path(folder): Path<String>) -> Result<Response, ApiError> {
    serve(&state, folder, String::new()).await
}

/// GET /i3s/{folder}/{*path} — any resource inside an extracted package.
pub async fn resource(
    State(state): State<AppState>,
    Path((folder, path)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    serve(&state, folder, path).await
}

async fn serve(state: &AppState, folder: String, path: String) -> Result<Response, ApiError> {
    let root = package_root(state, &folder).ok_or_else(|| AssetNotFound {
        requested: path.clone(),
        attempted: Vec::new(),
    })?;

    if !tokio::fs::metadata(&root).await.map(|m| m.is_dir()).unwrap_or(false) {
        metrics::counter!("i3s_requests_total", "outcome" => "unknown_package").increment(1);
        return Err(AssetNotFound {
            requested: path,
            attempted: Vec::new(),
        }
        .into());
    }

    let requested = path.clone();
    let resolved = tokio::task::spawn_blocking(move || i3s_resolver::resolve(&root, &requested))
        .await
        .map_err(|e| ApiError::Internal(format!("Resolver task failed: {}", e)))?;

    let asset = match resolved {
        Ok(asset) => asset,
        Err(miss) => {
            tracing::debug!(
                folder = %folder,
                requested = %miss.requested,
                attempts = miss.attempted.len(),
                "I3S resource not found"
            );
            metrics::counter!("i3s_requests_total", "outcome" => "miss").increment(1);
            return Err(miss.into());
        }
    };

    metrics::counter!("i3s_requests_total", "outcome" => "hit").increment(1);
    respond(asset).await
}

/// Extraction directory for `folder`. Only a single plain path segment is accepted.
fn package_root(state: &AppState, folder: &str) -> Option<PathBuf> {
    let plain = !folder.is_empty()
        && !folder.starts_with('.')
        && !folder.contains(['/', '\\', '\0']);
    plain.then(|| state.dispatcher.storage().root().join(folder))
}

async fn respond(asset: ResolvedAsset) -> Result<Response, ApiError> {
    let body = if asset.gzipped {
        let chunks = gunzip_stream(asset.path.clone())
            .await
            .map_err(|e| ApiError::Internal(format!("Failed to open {}: {}", asset.relative, e)))?;
        Body::from_stream(chunks)
    } else {
        let file = tokio::fs::File::open(&asset.path)
            .await
            .map_err(|e| ApiError::Internal(format!("Failed to open {}: {}", asset.relative, e)))?;
        Body::from_stream(ReaderStream::new(file))
    };

    let content_type =
        HeaderValue::from_str(&asset.content_type).unwrap_or(HeaderValue::from_static("application/octet-stream"));
    let resolved =
        HeaderValue::from_str(&asset.relative).unwrap_or(HeaderValue::from_static("unprintable"));

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type), (RESOLVED_PATH_HEADER.clone(), resolved)],
        body,
    )
        .into_response())
}
