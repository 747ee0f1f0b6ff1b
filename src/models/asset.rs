use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// How an uploaded file is handled. The set is fixed; unknown extensions map
/// to [`Strategy::UnknownPassthrough`].
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, IntoStaticStr, PartialEq, Eq, Hash,
)]
pub enum Strategy {
    #[serde(rename = "tiles3d")]
    #[strum(serialize = "tiles3d")]
    Tiles3d,
    #[serde(rename = "gltf")]
    #[strum(serialize = "gltf")]
    Gltf,
    #[serde(rename = "pointcloud")]
    #[strum(serialize = "pointcloud")]
    PointCloud,
    #[serde(rename = "gaussian-splat")]
    #[strum(serialize = "gaussian-splat")]
    GaussianSplat,
    #[serde(rename = "mesh-convert")]
    #[strum(serialize = "mesh-convert")]
    MeshConvert,
    #[serde(rename = "geospatial-raw")]
    #[strum(serialize = "geospatial-raw")]
    GeospatialRaw,
    #[serde(rename = "slpk-to-i3s")]
    #[strum(serialize = "slpk-to-i3s")]
    SlpkToI3s,
    #[serde(rename = "archive")]
    #[strum(serialize = "archive")]
    Archive,
    #[serde(rename = "photogrammetry-raw")]
    #[strum(serialize = "photogrammetry-raw")]
    PhotogrammetryRaw,
    #[serde(rename = "bim-convert")]
    #[strum(serialize = "bim-convert")]
    BimConvert,
    #[serde(rename = "unknown-passthrough")]
    #[strum(serialize = "unknown-passthrough")]
    UnknownPassthrough,
}

/// What happens when a strategy's converter fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackPolicy {
    /// Serve the original upload unchanged.
    ServeRaw,
    /// Surface a terminal conversion error. Cesium renderers cannot display
    /// raw LAS/LAZ/PLY, so a raw point cloud is never a usable result.
    Fail,
}

impl Strategy {
    /// Prefix used for files and directories this strategy writes under the uploads root.
    pub fn file_prefix(self) -> &'static str {
        match self {
            Strategy::Tiles3d => "3dtiles",
            Strategy::Gltf => "gltf",
            Strategy::PointCloud => "pointcloud",
            Strategy::GaussianSplat => "splats",
            Strategy::MeshConvert => "traditional",
            Strategy::GeospatialRaw => "geospatial",
            Strategy::SlpkToI3s => "slpk",
            Strategy::Archive => "archive",
            Strategy::PhotogrammetryRaw => "photogrammetry",
            Strategy::BimConvert => "bim",
            Strategy::UnknownPassthrough => "unknown",
        }
    }

    pub fn fallback_policy(self) -> FallbackPolicy {
        match self {
            Strategy::PointCloud => FallbackPolicy::Fail,
            _ => FallbackPolicy::ServeRaw,
        }
    }
}

/// Outcome of processing an upload, exposed through the job status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessingResult {
    pub filename: String,
    pub url: String,
    pub size: u64,
    pub processing_type: String,
    pub strategy: Strategy,
    pub original_format: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub entry_point: Option<String>,
}
