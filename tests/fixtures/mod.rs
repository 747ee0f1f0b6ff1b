//! Package and model fixtures built in memory.
#![allow(dead_code)]

use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;

/// A small upload and what processing it should produce.
#[derive(Debug, Clone)]
pub struct ModelFixture {
    pub filename: &'static str,
    pub bytes: &'static [u8],
    pub strategy: &'static str,
    pub processing_type: &'static str,
}

/// Uploads that are served without any converter.
pub const RAW_FIXTURES: &[ModelFixture] = &[
    ModelFixture {
        filename: "tower.glb",
        bytes: b"glTF\x02\x00\x00\x00",
        strategy: "gltf",
        processing_type: "gltf",
    },
    ModelFixture {
        filename: "tileset.json",
        bytes: br#"{"asset":{"version":"1.1"},"geometricError":0}"#,
        strategy: "tiles3d",
        processing_type: "3d_tiles",
    },
    ModelFixture {
        filename: "garden.splat",
        bytes: b"\x00\x01\x02\x03",
        strategy: "gaussian-splat",
        processing_type: "gaussian_splats_raw",
    },
    ModelFixture {
        filename: "parcels.kml",
        bytes: b"<kml/>",
        strategy: "geospatial-raw",
        processing_type: "geospatial_raw",
    },
    ModelFixture {
        filename: "rig.blend",
        bytes: b"BLENDER",
        strategy: "unknown-passthrough",
        processing_type: "unknown_raw",
    },
];

pub fn gzip_bytes(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("gzip write");
    encoder.finish().expect("gzip finish")
}

pub fn zip_bytes(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("zip entry");
        writer.write_all(data).expect("zip write");
    }
    writer.finish().expect("zip finish").into_inner()
}

/// `SceneServer/service.json` with the layer under `SceneServer/layers/0`.
pub fn scene_server_slpk() -> Vec<u8> {
    zip_bytes(&[
        ("SceneServer/service.json", br#"{"serviceName":"campus"}"#.to_vec()),
        ("SceneServer/layers/0/layer.json", br#"{"id":0,"layerType":"3DObject"}"#.to_vec()),
        (
            "SceneServer/layers/0/nodes/root/3dNodeIndexDocument.json",
            br#"{"id":"root"}"#.to_vec(),
        ),
    ])
}

/// Root-level `3dSceneLayer.json` with `nodes/` at the root and gzipped members.
pub fn flat_gzipped_slpk() -> Vec<u8> {
    zip_bytes(&[
        ("3dSceneLayer.json.gz", gzip_bytes(br#"{"id":0,"layerType":"IntegratedMesh"}"#)),
        ("nodes/5/3dNodeIndexDocument.json.gz", gzip_bytes(br#"{"id":"5"}"#)),
        ("nodes/5/geometries/0.bin.gz", gzip_bytes(b"\x01\x02\x03\x04")),
        ("nodes/5/textures/0.jpg", b"\xff\xd8\xff\xe0".to_vec()),
        ("metadata.json", br#"{"folderPattern":"basic"}"#.to_vec()),
    ])
}

/// A package with no I3S markers at all.
pub fn unrecognized_slpk() -> Vec<u8> {
    zip_bytes(&[
        ("readme.txt", b"exported by hand".to_vec()),
        ("data/points.json", b"[]".to_vec()),
        ("data/blob.bin", b"\x00".to_vec()),
    ])
}

/// A plain zip holding a glTF with a sibling buffer.
pub fn gltf_bundle_zip() -> Vec<u8> {
    zip_bytes(&[
        ("bundle/scene.gltf", br#"{"asset":{"version":"2.0"},"buffers":[{"uri":"scene.bin"}]}"#.to_vec()),
        ("bundle/scene.bin", b"\x00\x00\x80\x3f".to_vec()),
    ])
}
