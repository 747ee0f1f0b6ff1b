use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::asset::ProcessingResult;

/// Lifecycle of an upload job. Transitions only move forward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Done,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }

    fn rank(self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Processing => 1,
            JobStatus::Done | JobStatus::Error => 2,
        }
    }

    /// Whether a job currently in `self` may move to `next`.
    pub fn can_become(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next.rank() >= self.rank()
    }
}

/// Pipeline stage reported alongside the status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Saved,
    ExtractingArchive,
    DetectingEntryPoint,
    ConvertingModel,
    ConvertingPointCloud,
    GeneratingTileset,
    Done,
}

/// An upload and its background processing state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadJob {
    pub id: Uuid,
    pub filename: String,
    pub status: JobStatus,
    pub stage: JobStage,
    pub progress: u8,
    pub message: String,
    pub error: Option<String>,
    pub result: Option<ProcessingResult>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadJob {
    pub fn new(filename: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            filename: filename.to_string(),
            status: JobStatus::Queued,
            stage: JobStage::Saved,
            progress: 0,
            message: "Upload saved, waiting for processing".to_string(),
            error: None,
            result: None,
            details: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a partial update, enforcing forward-only status and progress.
    pub fn apply(&mut self, update: JobUpdate) -> Result<(), JobTransitionError> {
        if let Some(next) = update.status {
            if !self.status.can_become(next) {
                return Err(JobTransitionError {
                    from: self.status,
                    to: next,
                });
            }
        } else if self.status.is_terminal() {
            return Err(JobTransitionError {
                from: self.status,
                to: self.status,
            });
        }

        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(stage) = update.stage {
            self.stage = stage;
        }
        if let Some(progress) = update.progress {
            self.progress = self.progress.max(progress.min(100));
        }
        if self.status == JobStatus::Done {
            self.progress = 100;
        }
        if let Some(message) = update.message {
            self.message = message;
        }
        if update.error.is_some() {
            self.error = update.error;
        }
        if update.result.is_some() {
            self.result = update.result;
        }
        if update.details.is_some() {
            self.details = update.details;
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Partial update of an [`UploadJob`]. Unset fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub stage: Option<JobStage>,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub result: Option<ProcessingResult>,
    pub details: Option<serde_json::Value>,
}

impl JobUpdate {
    pub fn started() -> Self {
        Self {
            status: Some(JobStatus::Processing),
            progress: Some(5),
            message: Some("Processing started".to_string()),
            ..Self::default()
        }
    }

    pub fn stage(stage: JobStage, progress: u8, message: impl Into<String>) -> Self {
        Self {
            stage: Some(stage),
            progress: Some(progress),
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn done(result: ProcessingResult) -> Self {
        Self {
            status: Some(JobStatus::Done),
            stage: Some(JobStage::Done),
            progress: Some(100),
            message: Some(result.message.clone()),
            result: Some(result),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>, details: Option<serde_json::Value>) -> Self {
        let error = error.into();
        Self {
            status: Some(JobStatus::Error),
            message: Some(format!("Processing failed: {}", error)),
            error: Some(error),
            details,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Job cannot move from {from:?} to {to:?}")]
pub struct JobTransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}
