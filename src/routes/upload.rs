use axum::extract::{Multipart, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;

use crate::app_state::AppState;
use crate::models::upload::UploadAccepted;
use crate::routes::error::ApiError;
use crate::services::dispatcher::StagedUpload;
use crate::services::ingest::spawn_ingest;
use crate::services::storage::{remove_quietly, sanitize_filename, UploadError};

/// Allowance for multipart boundaries and part headers on top of the file limit.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// POST /api/upload-model — stream a model to disk and start processing it.
///
/// Unsupported extensions and oversized bodies are rejected before the
/// background job exists.
pub async fn upload_model(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadAccepted>), ApiError> {
    let limit = state.max_upload_bytes;

    if let Some(declared) = content_length(&headers) {
        if declared > limit.saturating_add(MULTIPART_OVERHEAD) {
            metrics::counter!("upload_rejections_total", "reason" => "payload_too_large").increment(1);
            return Err(ApiError::PayloadTooLarge { limit });
        }
    }

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let original = field
            .file_name()
            .map(|n| n.to_string())
            .ok_or_else(|| ApiError::BadRequest("Upload has no filename".to_string()))?;

        let classified = state.formats.classify(&original).inspect_err(|_| {
            metrics::counter!("upload_rejections_total", "reason" => "unsupported_format").increment(1);
        })?;

        let filename = sanitize_filename(&original);
        let storage = state.dispatcher.storage();
        let staged = storage
            .reserve_file("original", &filename)
            .await
            .map_err(UploadError::from)?;

        let size = storage
            .write_stream(&staged, Box::pin(field), limit)
            .await
            .inspect_err(|e| {
                tracing::warn!(filename = %filename, error = %e, "Upload aborted");
                metrics::counter!("upload_rejections_total", "reason" => "stream").increment(1);
            })?;

        let job = match state.jobs.create(&filename).await {
            Ok(job) => job,
            Err(e) => {
                remove_quietly(&staged).await;
                return Err(e.into());
            }
        };

        tracing::info!(
            job_id = %job.id,
            filename = %filename,
            strategy = %classified.strategy,
            size,
            "Upload accepted"
        );
        let strategy: &'static str = classified.strategy.into();
        metrics::counter!("uploads_total", "strategy" => strategy).increment(1);

        let accepted = UploadAccepted {
            job_id: job.id,
            status: "processing".to_string(),
            filename: filename.clone(),
            strategy: classified.strategy,
        };

        spawn_ingest(
            state.jobs.clone(),
            state.dispatcher.clone(),
            StagedUpload {
                job_id: job.id,
                filename,
                classified,
                path: staged,
                size,
            },
        );

        return Ok((StatusCode::ACCEPTED, Json(accepted)));
    }

    Err(ApiError::BadRequest("Missing multipart field 'file'".to_string()))
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}
