//! Maps service errors to HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::services::formats::FormatError;
use crate::services::i3s_resolver::AssetNotFound;
use crate::services::job_store::JobStoreError;
use crate::services::storage::UploadError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    /// Machine-readable error code.
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempted_paths: Option<Vec<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    UnsupportedFormat(#[from] FormatError),

    #[error("File too large. Maximum size: {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    #[error("{0}")]
    BadRequest(String),

    #[error("Job {0} not found")]
    JobNotFound(Uuid),

    #[error(transparent)]
    AssetNotFound(#[from] AssetNotFound),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::UnsupportedFormat(_) => "unsupported_format",
            ApiError::PayloadTooLarge { .. } => "payload_too_large",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::JobNotFound(_) => "job_not_found",
            ApiError::AssetNotFound(_) => "asset_not_found",
            ApiError::Internal(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::UnsupportedFormat(_) | ApiError::PayloadTooLarge { .. } | ApiError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::JobNotFound(_) | ApiError::AssetNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::PayloadTooLarge { limit } => ApiError::PayloadTooLarge { limit },
            UploadError::Stream(msg) => ApiError::BadRequest(format!("Upload stream failed: {}", msg)),
            UploadError::Io(e) => ApiError::Internal(format!("Failed to store upload: {}", e)),
        }
    }
}

impl From<JobStoreError> for ApiError {
    fn from(err: JobStoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Internal server error");
        }

        let (requested, attempted_paths) = match &self {
            ApiError::AssetNotFound(miss) => (Some(miss.requested.clone()), Some(miss.attempted.clone())),
            _ => (None, None),
        };

        let body = ApiErrorBody {
            error: self.code().to_string(),
            message: self.to_string(),
            requested,
            attempted_paths,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let unsupported = ApiError::from(FormatError::Unsupported {
            extension: ".exe".to_string(),
        });
        assert_eq!(unsupported.status(), StatusCode::BAD_REQUEST);
        assert_eq!(unsupported.code(), "unsupported_format");

        let too_large = ApiError::from(UploadError::PayloadTooLarge { limit: 10 });
        assert_eq!(too_large.status(), StatusCode::BAD_REQUEST);
        assert_eq!(too_large.code(), "payload_too_large");

        let miss = ApiError::from(AssetNotFound {
            requested: "nodes/1".to_string(),
            attempted: vec!["nodes/1".to_string()],
        });
        assert_eq!(miss.status(), StatusCode::NOT_FOUND);
    }
}
