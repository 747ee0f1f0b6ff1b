use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::job::UploadJob;
use crate::routes::error::ApiError;

/// GET /api/jobs/{job_id} — current snapshot of an upload job.
pub async fn get_job(State(state): State<AppState>, Path(job_id): Path<Uuid>) -> Result<Json<UploadJob>, ApiError> {
    state
        .jobs
        .get(job_id)
        .await?
        .map(Json)
        .ok_or(ApiError::JobNotFound(job_id))
}
