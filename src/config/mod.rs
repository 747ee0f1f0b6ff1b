use garde::Validate;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::services::extraction::ExtractionLimits;

const GIB: u64 = 1024 * 1024 * 1024;

/// Which backend holds upload job state.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStoreBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:5001").
    #[serde(default = "default_bind_addr")]
    #[garde(length(min = 1))]
    pub bind_addr: String,

    /// Root directory for staged uploads, converted assets and extracted packages.
    #[serde(default = "default_uploads_dir")]
    #[garde(skip)]
    pub uploads_dir: PathBuf,

    /// Hard limit for a single uploaded file, enforced while streaming.
    #[serde(default = "default_max_upload_bytes")]
    #[garde(range(min = 1))]
    pub max_upload_bytes: u64,

    /// Comma separated extension allow-list (".glb,.las"). Unset means every
    /// extension the format registry knows about.
    #[serde(default)]
    #[garde(skip)]
    pub allowed_extensions: Option<String>,

    #[serde(default)]
    #[garde(skip)]
    pub job_store: JobStoreBackend,

    /// Redis connection string, required for `JOB_STORE=redis`.
    #[serde(default)]
    #[garde(custom(require_redis_url(&self.job_store)))]
    pub redis_url: Option<String>,

    /// How long finished jobs stay pollable.
    #[serde(default = "default_job_ttl_secs")]
    #[garde(range(min = 1))]
    pub job_ttl_secs: u64,

    #[serde(default = "default_blender_bin")]
    #[garde(length(min = 1))]
    pub blender_bin: String,

    #[serde(default = "default_py3dtiles_bin")]
    #[garde(length(min = 1))]
    pub py3dtiles_bin: String,

    #[serde(default = "default_potree_bin")]
    #[garde(length(min = 1))]
    pub potree_bin: String,

    #[serde(default = "default_ifcconvert_bin")]
    #[garde(length(min = 1))]
    pub ifcconvert_bin: String,

    #[serde(default = "default_mesh_timeout_secs")]
    #[garde(range(min = 1))]
    pub mesh_timeout_secs: u64,

    #[serde(default = "default_point_cloud_timeout_secs")]
    #[garde(range(min = 1))]
    pub point_cloud_timeout_secs: u64,

    #[serde(default = "default_bim_timeout_secs")]
    #[garde(range(min = 1))]
    pub bim_timeout_secs: u64,

    /// Maximum number of members accepted in an archive or SLPK.
    #[serde(default = "default_max_archive_entries")]
    #[garde(range(min = 1))]
    pub max_archive_entries: usize,

    /// Maximum total uncompressed size of an archive.
    #[serde(default = "default_max_extracted_bytes")]
    #[garde(range(min = 1))]
    pub max_extracted_bytes: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:5001".to_string()
}

fn default_uploads_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_max_upload_bytes() -> u64 {
    5 * GIB
}

fn default_job_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_blender_bin() -> String {
    "blender".to_string()
}

fn default_py3dtiles_bin() -> String {
    "py3dtiles".to_string()
}

fn default_potree_bin() -> String {
    "PotreeConverter".to_string()
}

fn default_ifcconvert_bin() -> String {
    "IfcConvert".to_string()
}

fn default_mesh_timeout_secs() -> u64 {
    120
}

fn default_point_cloud_timeout_secs() -> u64 {
    300
}

fn default_bim_timeout_secs() -> u64 {
    300
}

fn default_max_archive_entries() -> usize {
    100_000
}

fn default_max_extracted_bytes() -> u64 {
    20 * GIB
}

fn require_redis_url(backend: &JobStoreBackend) -> impl FnOnce(&Option<String>, &()) -> garde::Result + '_ {
    move |url, _| match (backend, url) {
        (JobStoreBackend::Redis, None) => Err(garde::Error::new("REDIS_URL is required when JOB_STORE=redis")),
        _ => Ok(()),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parsed allow-list, lower-cased and dot-prefixed. `None` means the registry default.
    pub fn allowed_extensions(&self) -> Option<Vec<String>> {
        let raw = self.allowed_extensions.as_deref()?;
        let list: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|ext| !ext.is_empty())
            .map(|ext| format!(".{}", ext.trim_start_matches('.').to_ascii_lowercase()))
            .collect();
        if list.is_empty() {
            None
        } else {
            Some(list)
        }
    }

    pub fn job_ttl(&self) -> Duration {
        Duration::from_secs(self.job_ttl_secs)
    }

    pub fn extraction_limits(&self) -> ExtractionLimits {
        ExtractionLimits {
            max_entries: self.max_archive_entries,
            max_total_bytes: self.max_extracted_bytes,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] garde::Report),
}
