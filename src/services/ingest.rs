//! Background processing of accepted uploads.
//!
//! The dispatcher runs inside a nested task so a panic surfaces as a
//! `JoinError` here. Every job ends in `done` or `error`. On failure the
//! staged upload and any output directory the job created are removed,
//! except an extracted tree without an I3S entry point.

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

use crate::models::job::JobUpdate;
use crate::services::dispatcher::{Dispatcher, IngestError, JobReporter, StagedUpload};
use crate::services::job_store::JobStore;
use crate::services::storage::remove_quietly;

pub fn spawn_ingest(jobs: Arc<dyn JobStore>, dispatcher: Arc<Dispatcher>, upload: StagedUpload) -> JoinHandle<()> {
    tokio::spawn(run_ingest(jobs, dispatcher, upload))
}

pub async fn run_ingest(jobs: Arc<dyn JobStore>, dispatcher: Arc<Dispatcher>, upload: StagedUpload) {
    let start = Instant::now();
    let job_id = upload.job_id;
    let strategy: &'static str = upload.strategy().into();
    let staged = upload.path.clone();
    let work_dir = dispatcher.work_dir(job_id);

    if let Err(e) = jobs.update(job_id, JobUpdate::started()).await {
        tracing::error!(job_id = %job_id, error = %e, "Failed to mark job as processing");
    }

    let reporter = JobReporter::new(jobs.clone(), job_id);
    let task = {
        let dispatcher = dispatcher.clone();
        let reporter = reporter.clone();
        tokio::spawn(async move { dispatcher.process(&upload, &reporter).await })
    };

    let outcome = match task.await {
        Ok(outcome) => outcome,
        Err(join_error) => {
            let reason = if join_error.is_panic() {
                panic_message(join_error.into_panic())
            } else {
                "task cancelled".to_string()
            };
            Err(IngestError::Aborted(reason))
        }
    };

    remove_quietly(&work_dir).await;
    metrics::histogram!("upload_processing_seconds", "strategy" => strategy)
        .record(start.elapsed().as_secs_f64());

    let update = match outcome {
        Ok(result) => {
            tracing::info!(
                job_id = %job_id,
                strategy,
                processing_type = %result.processing_type,
                url = %result.url,
                duration_ms = start.elapsed().as_millis() as u64,
                "Upload processed"
            );
            metrics::counter!("upload_jobs_completed", "strategy" => strategy).increment(1);
            JobUpdate::done(result)
        }
        Err(e) => {
            tracing::error!(job_id = %job_id, strategy, kind = e.kind(), error = %e, "Upload processing failed");
            metrics::counter!("upload_jobs_failed", "strategy" => strategy, "kind" => e.kind()).increment(1);
            remove_quietly(&staged).await;
            if !matches!(e, IngestError::EntryPointNotFound(_)) {
                for output in reporter.claimed_outputs().await {
                    tracing::info!(job_id = %job_id, dir = %output.display(), "Removing partial output");
                    remove_quietly(&output).await;
                }
            }
            JobUpdate::failed(e.to_string(), Some(e.details()))
        }
    };

    if let Err(e) = jobs.update(job_id, update).await {
        tracing::error!(job_id = %job_id, error = %e, "Failed to record final job state");
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{JobStage, JobStatus};
    use crate::services::converters::{Converter, ConverterSet};
    use crate::services::executor::ConversionError;
    use crate::services::extraction::ExtractionLimits;
    use crate::services::formats::FormatRegistry;
    use crate::services::job_store::InMemoryJobStore;
    use crate::services::storage::UploadStorage;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    struct Panicking;

    #[async_trait]
    impl Converter for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn convert(&self, _input: &Path, work_dir: &Path) -> Result<PathBuf, ConversionError> {
            tokio::fs::write(work_dir.join("r0.pnts"), b"half").await?;
            panic!("converter exploded");
        }
    }

    fn outputs(dispatcher: &Dispatcher) -> Vec<String> {
        std::fs::read_dir(dispatcher.storage().root())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n != ".work")
            .collect()
    }

    async fn setup(
        converters: ConverterSet,
        filename: &str,
    ) -> (tempfile::TempDir, Arc<dyn JobStore>, Arc<Dispatcher>, StagedUpload) {
        let dir = tempfile::tempdir().unwrap();
        let storage = UploadStorage::new(dir.path().join("uploads"));
        storage.ensure_root().await.unwrap();

        let jobs: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new(Duration::from_secs(60)));
        let job = jobs.create(filename).await.unwrap();

        let path = storage.reserve_file("original", filename).await.unwrap();
        tokio::fs::write(&path, b"payload").await.unwrap();
        let upload = StagedUpload {
            job_id: job.id,
            filename: filename.to_string(),
            classified: FormatRegistry::new().classify(filename).unwrap(),
            path,
            size: 7,
        };

        let dispatcher = Arc::new(Dispatcher::new(storage, converters, ExtractionLimits::default()));
        (dir, jobs, dispatcher, upload)
    }

    #[tokio::test]
    async fn test_successful_job_is_done() {
        let (_dir, jobs, dispatcher, upload) = setup(ConverterSet::none(), "site.kml").await;
        let id = upload.job_id;

        spawn_ingest(jobs.clone(), dispatcher, upload).await.unwrap();

        let job = jobs.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.stage, JobStage::Done);
        assert_eq!(job.progress, 100);
        assert_eq!(job.result.unwrap().processing_type, "geospatial_raw");
    }

    #[tokio::test]
    async fn test_panic_becomes_error_and_cleans_up() {
        let converters = ConverterSet {
            point_cloud: Some(Arc::new(Panicking) as Arc<dyn Converter>),
            ..ConverterSet::none()
        };
        let (_dir, jobs, dispatcher, upload) = setup(converters, "scan.las").await;
        let id = upload.job_id;
        let staged = upload.path.clone();

        spawn_ingest(jobs.clone(), dispatcher.clone(), upload).await.unwrap();

        let job = jobs.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.error.unwrap().contains("converter exploded"));
        assert!(job.message.starts_with("Processing failed: "));
        assert_eq!(job.details.unwrap()["kind"], "aborted");
        assert!(!staged.exists());
        // The half-written pointcloud_<ts>_scan directory is gone too.
        assert!(outputs(&dispatcher).is_empty(), "{:?}", outputs(&dispatcher));
    }

    #[tokio::test]
    async fn test_conversion_failure_is_terminal_error() {
        let (_dir, jobs, dispatcher, upload) = setup(ConverterSet::none(), "scan.laz").await;
        let id = upload.job_id;
        let staged = upload.path.clone();

        run_ingest(jobs.clone(), dispatcher, upload).await;

        let job = jobs.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.result.is_none());
        assert_eq!(job.details.unwrap()["kind"], "tool_unavailable");
        assert!(!staged.exists());
    }

    #[tokio::test]
    async fn test_unrecognized_package_tree_survives_failure() {
        let mut archive = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        archive
            .start_file("readme.txt", zip::write::SimpleFileOptions::default())
            .unwrap();
        std::io::Write::write_all(&mut archive, b"no scene here").unwrap();
        let bytes = archive.finish().unwrap().into_inner();

        let (_dir, jobs, dispatcher, upload) = setup(ConverterSet::none(), "odd.slpk").await;
        tokio::fs::write(&upload.path, &bytes).await.unwrap();
        let id = upload.job_id;

        run_ingest(jobs.clone(), dispatcher.clone(), upload).await;

        let job = jobs.get(id).await.unwrap().unwrap();
        assert_eq!(job.details.unwrap()["kind"], "entry_point_not_found");
        let left = outputs(&dispatcher);
        assert_eq!(left.len(), 1);
        assert!(left[0].starts_with("slpk_"));
    }
}
