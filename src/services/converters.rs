use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::services::executor::{run_tool, ConversionError, ToolInvocation};

/// Name of the 3D Tiles root document produced by point cloud converters.
pub const TILESET_FILE: &str = "tileset.json";

/// Blender import/export script. Paths arrive after `--` on the command line.
const BLENDER_SCRIPT: &str = r#"import sys
import bpy

argv = sys.argv[sys.argv.index("--") + 1:]
src, dst = argv[0], argv[1]
ext = src.lower().rsplit(".", 1)[-1]

bpy.ops.object.select_all(action="SELECT")
bpy.ops.object.delete(use_global=False)

if ext == "obj":
    if hasattr(bpy.ops.wm, "obj_import"):
        bpy.ops.wm.obj_import(filepath=src)
    else:
        bpy.ops.import_scene.obj(filepath=src)
elif ext == "fbx":
    bpy.ops.import_scene.fbx(filepath=src)
elif ext == "dae":
    bpy.ops.wm.collada_import(filepath=src)
elif ext == "3ds":
    bpy.ops.import_scene.autodesk_3ds(filepath=src)
elif ext == "stl":
    if hasattr(bpy.ops.wm, "stl_import"):
        bpy.ops.wm.stl_import(filepath=src)
    else:
        bpy.ops.import_mesh.stl(filepath=src)
else:
    raise SystemExit("unsupported input: " + ext)

bpy.ops.export_scene.gltf(filepath=dst, export_format="GLB", export_animations=False, export_apply=True)
"#;

/// Converts one input file into an output inside `work_dir`.
///
/// Implementations return the path of the produced entry file. Failure is a
/// value, never a panic, and a zero exit without output is a failure.
#[async_trait]
pub trait Converter: Send + Sync {
    fn name(&self) -> &str;

    async fn convert(&self, input: &Path, work_dir: &Path) -> Result<PathBuf, ConversionError>;
}

/// Mesh (OBJ/FBX/DAE/3DS/STL) to GLB through headless Blender.
pub struct BlenderConverter {
    binary: String,
    timeout: Duration,
}

impl BlenderConverter {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Converter for BlenderConverter {
    fn name(&self) -> &str {
        "blender"
    }

    async fn convert(&self, input: &Path, work_dir: &Path) -> Result<PathBuf, ConversionError> {
        let (input, work_dir) = tool_paths(input, work_dir)?;
        tokio::fs::create_dir_all(&work_dir).await?;
        let script = work_dir.join("convert_to_glb.py");
        tokio::fs::write(&script, BLENDER_SCRIPT).await?;

        let output = work_dir.join(format!("{}.glb", file_stem(&input)));
        let invocation = ToolInvocation {
            program: self.binary.clone(),
            args: vec![
                "--background".to_string(),
                "--python".to_string(),
                script.to_string_lossy().to_string(),
                "--".to_string(),
                input.to_string_lossy().to_string(),
                output.to_string_lossy().to_string(),
            ],
            working_dir: Some(work_dir.clone()),
            timeout: self.timeout,
            expected_output: output,
        };

        Ok(run_tool(&invocation).await?.output_path)
    }
}

/// LAS/LAZ/PLY to 3D Tiles with py3dtiles.
pub struct Py3dtilesConverter {
    binary: String,
    timeout: Duration,
}

impl Py3dtilesConverter {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Converter for Py3dtilesConverter {
    fn name(&self) -> &str {
        "py3dtiles"
    }

    async fn convert(&self, input: &Path, work_dir: &Path) -> Result<PathBuf, ConversionError> {
        let (input, work_dir) = tool_paths(input, work_dir)?;
        tokio::fs::create_dir_all(&work_dir).await?;
        let invocation = ToolInvocation {
            program: self.binary.clone(),
            args: vec![
                "convert".to_string(),
                input.to_string_lossy().to_string(),
                "--out".to_string(),
                work_dir.to_string_lossy().to_string(),
                "--overwrite".to_string(),
            ],
            working_dir: Some(work_dir.clone()),
            timeout: self.timeout,
            expected_output: work_dir.join(TILESET_FILE),
        };

        Ok(run_tool(&invocation).await?.output_path)
    }
}

/// LAS/LAZ to 3D Tiles with PotreeConverter.
pub struct PotreeConverter {
    binary: String,
    timeout: Duration,
}

impl PotreeConverter {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Converter for PotreeConverter {
    fn name(&self) -> &str {
        "PotreeConverter"
    }

    async fn convert(&self, input: &Path, work_dir: &Path) -> Result<PathBuf, ConversionError> {
        let (input, work_dir) = tool_paths(input, work_dir)?;
        tokio::fs::create_dir_all(&work_dir).await?;
        let invocation = ToolInvocation {
            program: self.binary.clone(),
            args: vec![
                input.to_string_lossy().to_string(),
                "-o".to_string(),
                work_dir.to_string_lossy().to_string(),
            ],
            working_dir: Some(work_dir.clone()),
            timeout: self.timeout,
            expected_output: work_dir.join(TILESET_FILE),
        };

        Ok(run_tool(&invocation).await?.output_path)
    }
}

/// IFC to GLB with IfcOpenShell's IfcConvert.
pub struct IfcConvertConverter {
    binary: String,
    timeout: Duration,
}

impl IfcConvertConverter {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Converter for IfcConvertConverter {
    fn name(&self) -> &str {
        "IfcConvert"
    }

    async fn convert(&self, input: &Path, work_dir: &Path) -> Result<PathBuf, ConversionError> {
        let (input, work_dir) = tool_paths(input, work_dir)?;
        tokio::fs::create_dir_all(&work_dir).await?;
        let output = work_dir.join(format!("{}.glb", file_stem(&input)));
        let invocation = ToolInvocation {
            program: self.binary.clone(),
            args: vec![
                "-y".to_string(),
                input.to_string_lossy().to_string(),
                output.to_string_lossy().to_string(),
            ],
            working_dir: Some(work_dir.clone()),
            timeout: self.timeout,
            expected_output: output,
        };

        Ok(run_tool(&invocation).await?.output_path)
    }
}

/// Tries each converter in order, emptying `work_dir` between attempts so a
/// failed run cannot leave output that a later one appears to have produced.
/// The directory itself is kept, it may be a name reserved under the uploads root.
pub struct ConverterChain {
    name: String,
    converters: Vec<Arc<dyn Converter>>,
}

impl ConverterChain {
    pub fn new(converters: Vec<Arc<dyn Converter>>) -> Self {
        let name = converters
            .iter()
            .map(|c| c.name().to_string())
            .collect::<Vec<_>>()
            .join("|");
        Self { name, converters }
    }
}

#[async_trait]
impl Converter for ConverterChain {
    fn name(&self) -> &str {
        &self.name
    }

    async fn convert(&self, input: &Path, work_dir: &Path) -> Result<PathBuf, ConversionError> {
        let mut last_error = ConversionError::NotConfigured(self.name.clone());

        for converter in &self.converters {
            clear_dir(work_dir).await?;

            match converter.convert(input, work_dir).await {
                Ok(path) => return Ok(path),
                Err(e) => {
                    tracing::warn!(
                        converter = converter.name(),
                        input = %input.display(),
                        error = %e,
                        "Converter failed, trying next"
                    );
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

/// Converters available to the dispatcher. `None` means the strategy has no
/// converter and goes straight to its fallback.
#[derive(Clone)]
pub struct ConverterSet {
    pub mesh: Option<Arc<dyn Converter>>,
    pub point_cloud: Option<Arc<dyn Converter>>,
    pub bim: Option<Arc<dyn Converter>>,
}

impl ConverterSet {
    pub fn from_config(config: &AppConfig) -> Self {
        let point_cloud_timeout = Duration::from_secs(config.point_cloud_timeout_secs);
        let point_cloud: Arc<dyn Converter> = Arc::new(ConverterChain::new(vec![
            Arc::new(Py3dtilesConverter::new(&config.py3dtiles_bin, point_cloud_timeout)) as Arc<dyn Converter>,
            Arc::new(PotreeConverter::new(&config.potree_bin, point_cloud_timeout)) as Arc<dyn Converter>,
        ]));

        Self {
            mesh: Some(Arc::new(BlenderConverter::new(
                &config.blender_bin,
                Duration::from_secs(config.mesh_timeout_secs),
            ))),
            point_cloud: Some(point_cloud),
            bim: Some(Arc::new(IfcConvertConverter::new(
                &config.ifcconvert_bin,
                Duration::from_secs(config.bim_timeout_secs),
            ))),
        }
    }

    pub fn none() -> Self {
        Self {
            mesh: None,
            point_cloud: None,
            bim: None,
        }
    }

    /// Binaries to report on the health endpoint.
    pub fn binaries(config: &AppConfig) -> Vec<(&'static str, String)> {
        vec![
            ("blender", config.blender_bin.clone()),
            ("py3dtiles", config.py3dtiles_bin.clone()),
            ("potree", config.potree_bin.clone()),
            ("ifcconvert", config.ifcconvert_bin.clone()),
        ]
    }
}

async fn clear_dir(dir: &Path) -> io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            tokio::fs::remove_dir_all(entry.path()).await?;
        } else {
            tokio::fs::remove_file(entry.path()).await?;
        }
    }
    Ok(())
}

/// Tools run inside `work_dir`, so every path handed to them must be absolute.
fn tool_paths(input: &Path, work_dir: &Path) -> io::Result<(PathBuf, PathBuf)> {
    Ok((std::path::absolute(input)?, std::path::absolute(work_dir)?))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output")
        .to_string()
}

/// Shell scripts standing in for converter binaries. Each one checks the
/// argv its adapter builds and that every path in it is absolute.
#[cfg(all(test, unix))]
pub(crate) mod stub {
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    const PRELUDE: &str = r#"#!/bin/sh
set -e
abs() { case "$1" in /*) ;; *) echo "relative path $1 (cwd $(pwd))" >&2; exit 9 ;; esac; }
"#;

    pub const PY3DTILES: &str = r#"test "$1" = convert
abs "$2"; test -f "$2"
test "$3" = --out
abs "$4"
test "$5" = --overwrite
echo '{"asset":{"version":"1.0"}}' > "$4/tileset.json"
"#;

    pub const POTREE: &str = r#"abs "$1"; test -f "$1"
test "$2" = -o
abs "$3"
echo '{"asset":{"version":"1.0"}}' > "$3/tileset.json"
"#;

    pub const IFCCONVERT: &str = r#"test "$1" = -y
abs "$2"; test -f "$2"
abs "$3"
printf glTF > "$3"
"#;

    pub const BLENDER: &str = r#"test "$1" = --background
test "$2" = --python
abs "$3"; test -f "$3"
test "$4" = --
abs "$5"; test -f "$5"
abs "$6"
printf glTF > "$6"
"#;

    pub fn binary(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, format!("{}{}", PRELUDE, body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    /// Scratch directory under the current directory, addressed relatively.
    pub fn relative_scratch() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir_in(std::env::current_dir().unwrap()).unwrap();
        let relative = PathBuf::from(dir.path().file_name().unwrap());
        (dir, relative)
    }
}
