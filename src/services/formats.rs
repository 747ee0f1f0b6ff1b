//! Extension to strategy routing.
//!
//! The rule table is ordered and the first rule listing an extension wins.
//! Extensions that no rule lists resolve to [`Strategy::UnknownPassthrough`],
//! so the mapping is total. Rejection only happens against the allow-list.

use std::collections::HashSet;
use std::path::Path;

use crate::models::asset::Strategy;

/// Ordered (strategy, extensions) rules.
pub const FORMAT_RULES: &[(Strategy, &[&str])] = &[
    (Strategy::Tiles3d, &[".json", ".cmpt", ".b3dm", ".i3dm", ".pnts"]),
    (Strategy::Gltf, &[".gltf", ".glb"]),
    (Strategy::PointCloud, &[".las", ".laz", ".ply"]),
    (Strategy::GaussianSplat, &[".splat"]),
    (Strategy::MeshConvert, &[".obj", ".fbx", ".dae", ".3ds", ".stl"]),
    (Strategy::GeospatialRaw, &[".kml", ".kmz", ".citygml", ".gml"]),
    (Strategy::SlpkToI3s, &[".slpk"]),
    (Strategy::Archive, &[".zip", ".7z", ".rar"]),
    (Strategy::PhotogrammetryRaw, &[".jpg", ".jpeg", ".png", ".tiff", ".tif"]),
    (Strategy::BimConvert, &[".ifc", ".rvt", ".dwg"]),
];

/// Accepted by default but without a dedicated handler.
const PASSTHROUGH_EXTENSIONS: &[&str] = &[".blend", ".max", ".ma", ".mb"];

/// An upload classified by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    /// Lower-cased extension including the leading dot.
    pub extension: String,
    pub strategy: Strategy,
}

pub struct FormatRegistry {
    allowed: HashSet<String>,
}

impl FormatRegistry {
    /// Registry accepting every extension in the rule table plus the passthrough list.
    pub fn new() -> Self {
        let allowed = FORMAT_RULES
            .iter()
            .flat_map(|(_, exts)| exts.iter())
            .chain(PASSTHROUGH_EXTENSIONS.iter())
            .map(|ext| ext.to_string())
            .collect();
        Self { allowed }
    }

    /// Registry restricted to an explicit allow-list of dot-prefixed, lower-case extensions.
    pub fn with_allow_list<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let allowed = extensions
            .into_iter()
            .map(|ext| ext.into().to_ascii_lowercase())
            .collect();
        Self { allowed }
    }

    /// Total extension to strategy mapping.
    pub fn strategy_for(&self, extension: &str) -> Strategy {
        let extension = extension.to_ascii_lowercase();
        FORMAT_RULES
            .iter()
            .find(|(_, exts)| exts.contains(&extension.as_str()))
            .map(|(strategy, _)| *strategy)
            .unwrap_or(Strategy::UnknownPassthrough)
    }

    pub fn is_allowed(&self, extension: &str) -> bool {
        self.allowed.contains(&extension.to_ascii_lowercase())
    }

    /// Classify an uploaded filename, rejecting extensions outside the allow-list.
    pub fn classify(&self, filename: &str) -> Result<Classified, FormatError> {
        let extension = extension_of(filename).ok_or_else(|| FormatError::Unsupported {
            extension: String::new(),
        })?;

        if !self.is_allowed(&extension) {
            return Err(FormatError::Unsupported { extension });
        }

        let strategy = self.strategy_for(&extension);
        Ok(Classified {
            extension,
            strategy,
        })
    }

    /// Sorted allow-list, used in rejection messages.
    pub fn allowed_extensions(&self) -> Vec<String> {
        let mut list: Vec<String> = self.allowed.iter().cloned().collect();
        list.sort();
        list
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Lower-cased extension of `filename` with a leading dot.
pub fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
}

#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("Unsupported format: '{extension}'")]
    Unsupported { extension: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_rule_extension_maps_to_its_strategy() {
        let registry = FormatRegistry::new();
        for (strategy, exts) in FORMAT_RULES {
            for ext in *exts {
                assert_eq!(registry.strategy_for(ext), *strategy, "extension {}", ext);
                assert!(registry.is_allowed(ext));
            }
        }
    }

    #[test]
    fn test_mapping_is_stable_across_calls() {
        let registry = FormatRegistry::new();
        for ext in [".glb", ".las", ".slpk", ".zip", ".ifc", ".blend", ".xyz"] {
            let first = registry.strategy_for(ext);
            for _ in 0..5 {
                assert_eq!(registry.strategy_for(ext), first);
            }
        }
    }

    #[test]
    fn test_unknown_extension_maps_to_passthrough() {
        let registry = FormatRegistry::new();
        assert_eq!(registry.strategy_for(".blend"), Strategy::UnknownPassthrough);
        assert_eq!(registry.strategy_for(".xyz"), Strategy::UnknownPassthrough);
    }

    #[test]
    fn test_classify_is_case_insensitive() {
        let registry = FormatRegistry::new();
        let classified = registry.classify("Campus.SLPK").unwrap();
        assert_eq!(classified.extension, ".slpk");
        assert_eq!(classified.strategy, Strategy::SlpkToI3s);

        let scan = registry.classify("scan.PLY").unwrap();
        assert_eq!(scan.strategy, Strategy::PointCloud);
    }

    #[test]
    fn test_classify_rejects_unlisted_and_missing_extensions() {
        let registry = FormatRegistry::new();
        assert!(matches!(
            registry.classify("notes.txt"),
            Err(FormatError::Unsupported { extension }) if extension == ".txt"
        ));
        assert!(registry.classify("Makefile").is_err());
        assert!(registry.classify("model.blend").is_ok());
    }

    #[test]
    fn test_custom_allow_list_restricts_uploads() {
        let registry = FormatRegistry::with_allow_list([".glb", ".SLPK"]);
        assert!(registry.classify("a.glb").is_ok());
        assert!(registry.classify("b.slpk").is_ok());
        assert!(registry.classify("c.las").is_err());
        assert_eq!(registry.allowed_extensions(), vec![".glb", ".slpk"]);
    }
}
