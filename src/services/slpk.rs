//! Entry point detection for extracted I3S packages.
//!
//! The tree is indexed once, shallowest paths first and then by name, so the
//! same package always yields the same entry point.

use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntryPointKind {
    RootSceneLayer,
    SceneServer,
    ServiceWithLayers,
    LayerZero,
    SceneLayer,
    Layer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryPoint {
    pub kind: EntryPointKind,
    /// Path relative to the extraction root.
    pub path: String,
}

/// Shape of a tree that holds no recognizable I3S root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeDiagnostics {
    pub directories: usize,
    pub files: usize,
    pub json_files: usize,
    pub top_level: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    Ready(EntryPoint),
    Unrecognized(TreeDiagnostics),
}

/// Relative paths of every directory and file under a root, `/` separated.
#[derive(Debug, Default, Clone)]
pub struct TreeIndex {
    pub directories: Vec<String>,
    pub files: Vec<String>,
}

impl TreeIndex {
    pub fn scan(root: &Path) -> io::Result<Self> {
        let mut index = TreeIndex::default();
        let mut pending: Vec<(PathBuf, String)> = vec![(root.to_path_buf(), String::new())];

        while let Some((dir, prefix)) = pending.pop() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                let relative = if prefix.is_empty() {
                    name
                } else {
                    format!("{}/{}", prefix, name)
                };

                let file_type = entry.file_type()?;
                if file_type.is_dir() {
                    index.directories.push(relative.clone());
                    pending.push((entry.path(), relative));
                } else if file_type.is_file() {
                    index.files.push(relative);
                }
            }
        }

        index.directories.sort_by(|a, b| by_depth(a, b));
        index.files.sort_by(|a, b| by_depth(a, b));
        Ok(index)
    }

    fn has_file(&self, path: &str) -> bool {
        self.files.iter().any(|f| f == path)
    }

    fn has_dir(&self, path: &str) -> bool {
        self.directories.iter().any(|d| d == path)
    }

    fn first_file_named(&self, name: &str) -> Option<&String> {
        self.files.iter().find(|f| file_name(f) == name)
    }

    pub fn diagnostics(&self) -> TreeDiagnostics {
        let mut top_level: Vec<String> = self
            .directories
            .iter()
            .chain(self.files.iter())
            .filter(|p| !p.contains('/'))
            .cloned()
            .collect();
        top_level.sort();

        TreeDiagnostics {
            directories: self.directories.len(),
            files: self.files.len(),
            json_files: self
                .files
                .iter()
                .filter(|f| f.to_ascii_lowercase().ends_with(".json"))
                .count(),
            top_level,
        }
    }
}

type Detector = fn(&TreeIndex) -> Option<String>;

/// Detectors in priority order. The first hit wins.
const DETECTORS: &[(EntryPointKind, Detector)] = &[
    (EntryPointKind::RootSceneLayer, root_scene_layer),
    (EntryPointKind::SceneServer, scene_server_dir),
    (EntryPointKind::ServiceWithLayers, service_with_layers),
    (EntryPointKind::LayerZero, layer_zero),
    (EntryPointKind::SceneLayer, any_scene_layer),
    (EntryPointKind::Layer, any_layer),
];

pub fn detect(index: &TreeIndex) -> Detection {
    for (kind, detector) in DETECTORS {
        if let Some(path) = detector(index) {
            return Detection::Ready(EntryPoint { kind: *kind, path });
        }
    }
    Detection::Unrecognized(index.diagnostics())
}

/// Index `root` and detect its entry point on the blocking pool.
pub async fn inspect(root: &Path) -> io::Result<Detection> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || TreeIndex::scan(&root).map(|index| detect(&index)))
        .await
        .map_err(io::Error::other)?
}

fn root_scene_layer(index: &TreeIndex) -> Option<String> {
    index
        .has_file("3dSceneLayer.json")
        .then(|| "3dSceneLayer.json".to_string())
}

fn scene_server_dir(index: &TreeIndex) -> Option<String> {
    index
        .directories
        .iter()
        .find(|d| file_name(d) == "SceneServer")
        .cloned()
}

fn service_with_layers(index: &TreeIndex) -> Option<String> {
    index
        .files
        .iter()
        .filter(|f| file_name(f) == "service.json")
        .find(|f| index.has_dir(&sibling(f, "layers")))
        .cloned()
}

fn layer_zero(index: &TreeIndex) -> Option<String> {
    index
        .directories
        .iter()
        .filter(|d| *d == "layers/0" || d.ends_with("/layers/0"))
        .find(|d| {
            index.has_file(&format!("{}/3dSceneLayer.json", d)) || index.has_file(&format!("{}/layer.json", d))
        })
        .cloned()
}

fn any_scene_layer(index: &TreeIndex) -> Option<String> {
    index.first_file_named("3dSceneLayer.json").cloned()
}

fn any_layer(index: &TreeIndex) -> Option<String> {
    index.first_file_named("layer.json").cloned()
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn sibling(path: &str, name: &str) -> String {
    match path.rsplit_once('/') {
        Some((parent, _)) => format!("{}/{}", parent, name),
        None => name.to_string(),
    }
}

fn by_depth(a: &str, b: &str) -> std::cmp::Ordering {
    let depth = |p: &str| p.matches('/').count();
    depth(a).cmp(&depth(b)).then_with(|| a.cmp(b))
}
