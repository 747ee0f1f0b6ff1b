//! Maps I3S REST-style request paths onto an extracted scene layer tree.
//!
//! Packages from different producers lay the tree out differently: with or
//! without a `SceneServer/` level, with `nodes/` under `layers/<id>/` or at
//! the root, with or without `.json` on metadata files, with some members
//! still gzipped. Resolution tries an ordered list of candidates and returns
//! the first regular file. A miss carries every attempted path.

use std::fs;
use std::path::{Path, PathBuf};

/// Names that identify a directory as an I3S service base.
const SERVICE_MARKERS: &[&str] = &[
    "service.json",
    "3dSceneLayer.json",
    "layer.json",
    "SceneServer",
    "layers",
    "nodes",
];

const SERVICE_ROOT_CANDIDATES: &[&str] = &[
    "service.json",
    "SceneServer/service.json",
    "SceneServer/3dSceneLayer.json",
    "3dSceneLayer.json",
];

/// Files probed, in order, inside a candidate that turns out to be a directory.
const DIRECTORY_INDEXES: &[&str] = &["index.json", "3dNodeIndexDocument.json"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAsset {
    /// Path relative to the service base, including `.gz` when gzipped.
    pub relative: String,
    pub path: PathBuf,
    pub content_type: String,
    pub gzipped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("No I3S resource found for '{requested}' ({} paths tried)", .attempted.len())]
pub struct AssetNotFound {
    pub requested: String,
    pub attempted: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    path: String,
    probe_directory: bool,
}

impl Candidate {
    fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            probe_directory: false,
        }
    }

    fn any(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            probe_directory: true,
        }
    }
}

/// Resolve `requested` (slash separated, possibly empty) under `root`.
///
/// Blocking: callers on the runtime should go through `spawn_blocking`.
pub fn resolve(root: &Path, requested: &str) -> Result<ResolvedAsset, AssetNotFound> {
    let Some(segments) = normalize(requested) else {
        tracing::warn!(requested, "Rejected I3S path with traversal components");
        return Err(AssetNotFound {
            requested: requested.to_string(),
            attempted: Vec::new(),
        });
    };

    let base = service_base(root);
    let mut attempted: Vec<String> = Vec::new();

    for candidate in candidates(&segments) {
        let path = base.join(&candidate.path);
        attempted.push(candidate.path.clone());
        if path.is_file() {
            return Ok(found(&base, candidate.path, false));
        }

        if candidate.probe_directory && path.is_dir() {
            for index in DIRECTORY_INDEXES {
                let inner = format!("{}/{}", candidate.path, index);
                attempted.push(inner.clone());
                if base.join(&inner).is_file() {
                    return Ok(found(&base, inner, false));
                }
            }
        }
    }

    let gzip_probes: Vec<String> = attempted
        .iter()
        .filter(|p| !p.ends_with(".gz"))
        .map(|p| format!("{}.gz", p))
        .collect();

    for probe in gzip_probes {
        attempted.push(probe.clone());
        if base.join(&probe).is_file() {
            return Ok(found(&base, probe, true));
        }
    }

    Err(AssetNotFound {
        requested: requested.to_string(),
        attempted,
    })
}

/// Split into non-empty segments. `None` when any segment could escape the
/// root.
fn normalize(requested: &str) -> Option<Vec<&str>> {
    let segments: Vec<&str> = requested.split('/').filter(|s| !s.is_empty()).collect();
    let unsafe_segment = segments
        .iter()
        .any(|s| *s == "." || *s == ".." || s.contains('\\') || s.contains('\0'));

    if unsafe_segment {
        None
    } else {
        Some(segments)
    }
}

/// The ordered primary candidates for a normalized path. Directory index and
/// `.gz` probes are added while resolving.
fn candidates(segments: &[&str]) -> Vec<Candidate> {
    if segments.is_empty() {
        return SERVICE_ROOT_CANDIDATES.iter().map(|c| Candidate::file(*c)).collect();
    }

    let path = segments.join("/");

    if segments.len() == 2 && segments[0] == "layers" {
        return vec![
            Candidate::file(format!("{}/layer.json", path)),
            Candidate::file(format!("{}/3dSceneLayer.json", path)),
            Candidate::file(format!("SceneServer/{}/layer.json", path)),
            Candidate::file(format!("SceneServer/{}/3dSceneLayer.json", path)),
        ];
    }

    let mut bases = vec![path.clone(), format!("SceneServer/{}", path)];
    if let Some(alt) = strip_layer_prefix(segments) {
        bases.push(format!("SceneServer/{}", alt));
        bases.insert(2, alt);
    }

    let last = segments[segments.len() - 1];
    let mut out: Vec<Candidate> = bases.iter().map(|b| Candidate::any(b.clone())).collect();

    if !last.to_ascii_lowercase().ends_with(".json") {
        out.extend(bases.iter().map(|b| Candidate::any(format!("{}.json", b))));
    }
    if !last.contains('.') {
        out.extend(bases.iter().map(|b| Candidate::any(format!("{}.bin", b))));
    }
    out
}

/// `layers/<digits>/rest...` becomes `rest...` for trees that keep `nodes/`
/// at the root.
fn strip_layer_prefix(segments: &[&str]) -> Option<String> {
    match segments {
        ["layers", id, rest @ ..]
            if !rest.is_empty() && !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) =>
        {
            Some(rest.join("/"))
        }
        _ => None,
    }
}

/// Descend from `root` through wrapper directories: a directory whose only
/// entry is another directory and which holds no I3S markers itself.
pub fn service_base(root: &Path) -> PathBuf {
    let mut base = root.to_path_buf();

    loop {
        let entries: Vec<fs::DirEntry> = match fs::read_dir(&base) {
            Ok(entries) => entries.flatten().collect(),
            Err(_) => return base,
        };

        let has_marker = entries.iter().any(|e| {
            e.file_name()
                .to_str()
                .map(|name| SERVICE_MARKERS.contains(&name))
                .unwrap_or(false)
        });
        if has_marker || entries.len() != 1 {
            return base;
        }

        let only = &entries[0];
        match only.file_type() {
            Ok(ft) if ft.is_dir() => base = only.path(),
            _ => return base,
        }
    }
}

/// Content type from the file name alone: JSON, recognized images, or raw
/// bytes. A `.gz` suffix is ignored.
pub fn content_type_for(name: &str) -> String {
    let name = name.strip_suffix(".gz").unwrap_or(name);
    if name.to_ascii_lowercase().ends_with(".json") {
        return "application/json".to_string();
    }

    match mime_guess::from_path(name).first() {
        Some(mime) if mime.type_() == mime_guess::mime::IMAGE => mime.to_string(),
        _ => "application/octet-stream".to_string(),
    }
}

fn found(base: &Path, relative: String, gzipped: bool) -> ResolvedAsset {
    ResolvedAsset {
        path: base.join(&relative),
        content_type: content_type_for(&relative),
        relative,
        gzipped,
    }
}
