//! Per-strategy handling of a staged upload.
//!
//! Every handler ends in a [`ProcessingResult`] or an [`IngestError`]. Raw
//! handlers rename the staged file to `<prefix>_<ts>_<name>`; converting
//! handlers work in `.work/<job_id>` and fall back according to the
//! strategy's [`FallbackPolicy`].

use serde_json::json;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::asset::{FallbackPolicy, ProcessingResult, Strategy};
use crate::models::job::{JobStage, JobUpdate};
use crate::services::converters::{Converter, ConverterSet};
use crate::services::executor::ConversionError;
use crate::services::extraction::{extract_package, ExtractionError, ExtractionLimits, ExtractionSummary};
use crate::services::formats::Classified;
use crate::services::job_store::JobStore;
use crate::services::slpk::{self, Detection, EntryPoint, TreeDiagnostics, TreeIndex};
use crate::services::storage::{remove_quietly, stem_of, UploadStorage};

/// Model files looked for inside a generic archive, best first.
const ARCHIVE_MAIN_FILES: &[&str] = &[".gltf", ".glb", ".obj", ".fbx", ".dae", ".json", ".cmpt", ".b3dm"];

/// A file saved under the uploads root and waiting to be processed.
#[derive(Debug, Clone)]
pub struct StagedUpload {
    pub job_id: Uuid,
    /// Sanitized client filename.
    pub filename: String,
    pub classified: Classified,
    pub path: PathBuf,
    pub size: u64,
}

impl StagedUpload {
    pub fn strategy(&self) -> Strategy {
        self.classified.strategy
    }

    fn stem(&self) -> String {
        stem_of(&self.filename)
    }
}

/// Stage reporting for one job. Store failures are logged, never fatal.
///
/// Also records the output directories a job creates under the uploads root,
/// so the supervisor can remove them when processing dies half way.
#[derive(Clone)]
pub struct JobReporter {
    store: Arc<dyn JobStore>,
    job_id: Uuid,
    outputs: Arc<Mutex<Vec<PathBuf>>>,
}

impl JobReporter {
    pub fn new(store: Arc<dyn JobStore>, job_id: Uuid) -> Self {
        Self {
            store,
            job_id,
            outputs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn claim_output(&self, path: &Path) {
        self.outputs.lock().await.push(path.to_path_buf());
    }

    pub async fn release_output(&self, path: &Path) {
        self.outputs.lock().await.retain(|p| p != path);
    }

    pub async fn claimed_outputs(&self) -> Vec<PathBuf> {
        self.outputs.lock().await.clone()
    }

    pub async fn stage(&self, stage: JobStage, progress: u8, message: impl Into<String>) {
        if let Err(e) = self.store.update(self.job_id, JobUpdate::stage(stage, progress, message)).await {
            tracing::warn!(job_id = %self.job_id, error = %e, "Failed to record job stage");
        }
    }
}

pub struct Dispatcher {
    storage: UploadStorage,
    converters: ConverterSet,
    limits: ExtractionLimits,
}

impl Dispatcher {
    pub fn new(storage: UploadStorage, converters: ConverterSet, limits: ExtractionLimits) -> Self {
        Self {
            storage,
            converters,
            limits,
        }
    }

    pub fn storage(&self) -> &UploadStorage {
        &self.storage
    }

    /// Scratch directory for one job's converters.
    pub fn work_dir(&self, job_id: Uuid) -> PathBuf {
        self.storage.work_root().join(job_id.to_string())
    }

    pub async fn process(&self, upload: &StagedUpload, reporter: &JobReporter) -> Result<ProcessingResult, IngestError> {
        tracing::info!(
            job_id = %upload.job_id,
            filename = %upload.filename,
            strategy = %upload.strategy(),
            "Dispatching upload"
        );

        match upload.strategy() {
            Strategy::Tiles3d => self.serve_raw(upload, "3d_tiles", "3D Tiles file ready for CesiumJS").await,
            Strategy::Gltf => self.serve_raw(upload, "gltf", "glTF file ready for CesiumJS").await,
            Strategy::PointCloud => self.convert_point_cloud(upload, reporter).await,
            Strategy::GaussianSplat => {
                self.serve_raw(
                    upload,
                    "gaussian_splats_raw",
                    "Gaussian splats file (may need client-side processing)",
                )
                .await
            }
            Strategy::MeshConvert => self.convert_mesh(upload, reporter).await,
            Strategy::GeospatialRaw => {
                self.serve_raw(
                    upload,
                    "geospatial_raw",
                    "Geospatial file (may need client-side processing)",
                )
                .await
            }
            Strategy::SlpkToI3s => self.import_slpk(upload, reporter).await,
            Strategy::Archive => self.unpack_archive(upload, reporter).await,
            Strategy::PhotogrammetryRaw => self.store_image(upload).await,
            Strategy::BimConvert => self.convert_bim(upload, reporter).await,
            Strategy::UnknownPassthrough => {
                self.serve_raw(upload, "unknown_raw", "Unknown format, stored as uploaded").await
            }
        }
    }

    async fn serve_raw(
        &self,
        upload: &StagedUpload,
        processing_type: &str,
        message: impl Into<String>,
    ) -> Result<ProcessingResult, IngestError> {
        let served = self
            .storage
            .relocate(&upload.path, upload.strategy().file_prefix(), &upload.filename)
            .await?;
        self.file_result(upload, &served, processing_type, message.into())
    }

    /// Point clouds have no raw fallback. Success always points at a `tileset.json`.
    async fn convert_point_cloud(
        &self,
        upload: &StagedUpload,
        reporter: &JobReporter,
    ) -> Result<ProcessingResult, IngestError> {
        let converter = self.require(self.converters.point_cloud.as_ref(), "point cloud")?;
        let out_dir = self
            .storage
            .reserve_dir(upload.strategy().file_prefix(), &upload.stem())
            .await?;
        reporter.claim_output(&out_dir).await;

        reporter
            .stage(
                JobStage::ConvertingPointCloud,
                30,
                format!("Converting point cloud with {}", converter.name()),
            )
            .await;

        let tileset = match converter.convert(&upload.path, &out_dir).await {
            Ok(tileset) => tileset,
            Err(e) => {
                remove_quietly(&out_dir).await;
                reporter.release_output(&out_dir).await;
                return Err(e.into());
            }
        };

        reporter.stage(JobStage::GeneratingTileset, 90, "Tileset generated").await;
        remove_quietly(&upload.path).await;

        self.file_result(
            upload,
            &tileset,
            "point_cloud_3dtiles",
            "Point cloud converted to 3D Tiles".to_string(),
        )
    }

    async fn convert_mesh(&self, upload: &StagedUpload, reporter: &JobReporter) -> Result<ProcessingResult, IngestError> {
        let ext = upload.classified.extension.clone();
        reporter
            .stage(JobStage::ConvertingModel, 30, format!("Converting {} to GLB", ext))
            .await;

        match self.convert_to_glb(upload, self.converters.mesh.as_ref()).await {
            Ok(glb) => self.file_result(upload, &glb, "converted_gltf", format!("Converted {} to GLB", ext)),
            Err(e) => {
                tracing::warn!(job_id = %upload.job_id, error = %e, "Mesh conversion failed, serving original file");
                self.fallback(upload, e, "traditional_fallback", format!("Original {} file (conversion failed)", ext))
                    .await
            }
        }
    }

    /// Only IFC has a converter. Other BIM formats are stored as uploaded.
    async fn convert_bim(&self, upload: &StagedUpload, reporter: &JobReporter) -> Result<ProcessingResult, IngestError> {
        if upload.classified.extension != ".ifc" {
            return self.serve_raw(upload, "bim_raw", "BIM file (conversion not available)").await;
        }

        reporter
            .stage(JobStage::ConvertingModel, 30, "Converting IFC to GLB")
            .await;

        match self.convert_to_glb(upload, self.converters.bim.as_ref()).await {
            Ok(glb) => self.file_result(upload, &glb, "bim_converted", "BIM file converted to GLB".to_string()),
            Err(e) => {
                tracing::warn!(job_id = %upload.job_id, error = %e, "IFC conversion failed, serving original file");
                self.fallback(upload, e, "bim_raw", "BIM file (conversion failed)".to_string())
                    .await
            }
        }
    }

    /// Run a GLB converter in the job's work dir and move the output under
    /// the uploads root. The staged input is removed on success.
    async fn convert_to_glb(
        &self,
        upload: &StagedUpload,
        converter: Option<&Arc<dyn Converter>>,
    ) -> Result<PathBuf, ConversionError> {
        let converter = converter.ok_or_else(|| ConversionError::NotConfigured(upload.strategy().to_string()))?;
        let work_dir = self.work_dir(upload.job_id);

        let result = async {
            let glb = converter.convert(&upload.path, &work_dir).await?;
            let served = self
                .storage
                .relocate(&glb, upload.strategy().file_prefix(), &format!("{}.glb", upload.stem()))
                .await?;
            Ok::<_, ConversionError>(served)
        }
        .await;

        remove_quietly(&work_dir).await;
        if result.is_ok() {
            remove_quietly(&upload.path).await;
        }
        result
    }

    async fn fallback(
        &self,
        upload: &StagedUpload,
        error: ConversionError,
        processing_type: &str,
        message: String,
    ) -> Result<ProcessingResult, IngestError> {
        match upload.strategy().fallback_policy() {
            FallbackPolicy::ServeRaw => self.serve_raw(upload, processing_type, message).await,
            FallbackPolicy::Fail => Err(error.into()),
        }
    }

    /// `Saved -> ExtractingArchive -> DetectingEntryPoint -> Ready | Unrecognized`.
    /// An unrecognized tree is left on disk for inspection.
    async fn import_slpk(&self, upload: &StagedUpload, reporter: &JobReporter) -> Result<ProcessingResult, IngestError> {
        reporter
            .stage(JobStage::ExtractingArchive, 20, "Extracting scene layer package")
            .await;
        let (dest, summary) = self.extract_fresh(upload, reporter).await?;
        tracing::info!(
            job_id = %upload.job_id,
            files = summary.files,
            bytes = summary.bytes,
            gzip_decompressed = summary.gzip.decompressed,
            "Package extracted"
        );

        reporter
            .stage(JobStage::DetectingEntryPoint, 70, "Detecting I3S entry point")
            .await;
        let detection = slpk::inspect(&dest).await?;

        match detection {
            Detection::Ready(entry) => {
                remove_quietly(&upload.path).await;
                self.i3s_result(upload, &dest, &entry, "i3s_extracted")
            }
            Detection::Unrecognized(diagnostics) => {
                tracing::warn!(
                    job_id = %upload.job_id,
                    dir = %dest.display(),
                    files = diagnostics.files,
                    json_files = diagnostics.json_files,
                    "No I3S entry point found, leaving extracted tree for inspection"
                );
                Err(IngestError::EntryPointNotFound(Box::new(diagnostics)))
            }
        }
    }

    /// Zip archives are extracted. An I3S tree is served through `/i3s`,
    /// otherwise the best model file is exposed in place. Other archive
    /// formats are stored as uploaded.
    async fn unpack_archive(&self, upload: &StagedUpload, reporter: &JobReporter) -> Result<ProcessingResult, IngestError> {
        if upload.classified.extension != ".zip" {
            return self
                .serve_raw(upload, "archive_raw", "Archive file (format not extractable on the server)")
                .await;
        }

        reporter
            .stage(JobStage::ExtractingArchive, 20, "Extracting archive")
            .await;
        let (dest, _) = self.extract_fresh(upload, reporter).await?;

        reporter
            .stage(JobStage::DetectingEntryPoint, 70, "Looking for a model inside the archive")
            .await;
        let index = index_tree(&dest).await?;

        if let Detection::Ready(entry) = slpk::detect(&index) {
            remove_quietly(&upload.path).await;
            return self.i3s_result(upload, &dest, &entry, "archive_i3s");
        }

        match main_model_file(&index) {
            Some(main) => {
                remove_quietly(&upload.path).await;
                let name = main.rsplit('/').next().unwrap_or(main).to_string();
                self.file_result(
                    upload,
                    &dest.join(main),
                    "archive_extracted",
                    format!("Extracted {} from archive", name),
                )
            }
            None => {
                remove_quietly(&dest).await;
                self.serve_raw(upload, "archive_raw", "Archive file (no supported formats found inside)")
                    .await
            }
        }
    }

    /// Extract into a new `<prefix>_<ts>_<stem>` directory. Extraction creates
    /// the directory itself and refuses an existing one, so a name taken by a
    /// concurrent job between lookup and creation is retried with the next one.
    async fn extract_fresh(
        &self,
        upload: &StagedUpload,
        reporter: &JobReporter,
    ) -> Result<(PathBuf, ExtractionSummary), IngestError> {
        loop {
            let dest = self.storage.unique_path(upload.strategy().file_prefix(), &upload.stem());
            reporter.claim_output(&dest).await;
            match extract_package(&upload.path, &dest, self.limits).await {
                Ok(summary) => return Ok((dest, summary)),
                Err(ExtractionError::DestinationExists(taken)) => {
                    reporter.release_output(&taken).await;
                    tracing::debug!(dir = %taken.display(), "Extraction directory taken, retrying");
                }
                Err(e) => {
                    // Already removed by the extractor.
                    reporter.release_output(&dest).await;
                    return Err(e.into());
                }
            }
        }
    }

    async fn store_image(&self, upload: &StagedUpload) -> Result<ProcessingResult, IngestError> {
        let format = sniff_image(&upload.path).await;
        let message = match format {
            Some(format) => format!(
                "Image file ({:?}), photogrammetry processing not yet implemented",
                format
            ),
            None => "Image file (unrecognized encoding), photogrammetry processing not yet implemented".to_string(),
        };
        self.serve_raw(upload, "photogrammetry_raw", message).await
    }

    fn require<'a>(
        &self,
        converter: Option<&'a Arc<dyn Converter>>,
        what: &str,
    ) -> Result<&'a Arc<dyn Converter>, IngestError> {
        converter.ok_or_else(|| IngestError::Conversion(ConversionError::NotConfigured(what.to_string())))
    }

    fn file_result(
        &self,
        upload: &StagedUpload,
        served: &Path,
        processing_type: &str,
        message: String,
    ) -> Result<ProcessingResult, IngestError> {
        let url = self.storage.url_for(served).ok_or_else(|| {
            IngestError::Io(io::Error::other(format!(
                "{} is outside the uploads root",
                served.display()
            )))
        })?;
        let filename = served
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(ProcessingResult {
            filename,
            url,
            size: upload.size,
            processing_type: processing_type.to_string(),
            strategy: upload.strategy(),
            original_format: upload.classified.extension.clone(),
            message,
            entry_point: None,
        })
    }

    fn i3s_result(
        &self,
        upload: &StagedUpload,
        dest: &Path,
        entry: &EntryPoint,
        processing_type: &str,
    ) -> Result<ProcessingResult, IngestError> {
        let folder = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| IngestError::Io(io::Error::other("extraction directory has no name")))?;

        Ok(ProcessingResult {
            url: format!("/i3s/{}", folder),
            filename: folder,
            size: upload.size,
            processing_type: processing_type.to_string(),
            strategy: upload.strategy(),
            original_format: upload.classified.extension.clone(),
            message: format!("I3S scene layer ready ({} at {})", entry.kind, entry.path),
            entry_point: Some(entry.path.clone()),
        })
    }
}

async fn index_tree(root: &Path) -> io::Result<TreeIndex> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || TreeIndex::scan(&root))
        .await
        .map_err(io::Error::other)?
}

/// First file by extension priority, shallowest first.
fn main_model_file(index: &TreeIndex) -> Option<&str> {
    ARCHIVE_MAIN_FILES.iter().find_map(|ext| {
        index
            .files
            .iter()
            .find(|f| f.to_ascii_lowercase().ends_with(ext))
            .map(|f| f.as_str())
    })
}

async fn sniff_image(path: &Path) -> Option<image::ImageFormat> {
    let mut header = [0u8; 32];
    let mut file = tokio::fs::File::open(path).await.ok()?;
    let n = file.read(&mut header).await.ok()?;
    image::guess_format(&header[..n]).ok()
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("No I3S entry point found in extracted package ({} files, {} JSON)", .0.files, .0.json_files)]
    EntryPointNotFound(Box<TreeDiagnostics>),

    #[error("Processing task aborted: {0}")]
    Aborted(String),

    #[error("IO error during processing: {0}")]
    Io(#[from] io::Error),
}

impl IngestError {
    /// Short label for metrics and job details.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Conversion(ConversionError::ToolUnavailable(_))
            | IngestError::Conversion(ConversionError::NotConfigured(_)) => "tool_unavailable",
            IngestError::Conversion(_) => "conversion_failed",
            IngestError::Extraction(_) => "extraction_failed",
            IngestError::EntryPointNotFound(_) => "entry_point_not_found",
            IngestError::Aborted(_) => "aborted",
            IngestError::Io(_) => "io",
        }
    }

    /// Structured details stored on the failed job.
    pub fn details(&self) -> serde_json::Value {
        match self {
            IngestError::EntryPointNotFound(diag) => json!({
                "kind": self.kind(),
                "directories": diag.directories,
                "files": diag.files,
                "json_files": diag.json_files,
                "top_level": diag.top_level,
            }),
            _ => json!({ "kind": self.kind() }),
        }
    }
}
