use serde::Serialize;
use uuid::Uuid;

use crate::models::asset::Strategy;

/// Response after an upload has been accepted for background processing.
#[derive(Debug, Serialize)]
pub struct UploadAccepted {
    pub job_id: Uuid,
    pub status: String,
    pub filename: String,
    pub strategy: Strategy,
}
