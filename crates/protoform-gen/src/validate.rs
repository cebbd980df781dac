//! Inspection of generated blobs
//!
//! Images are sniffed for format and dimensions; meshes are parsed as glTF
//! to count what they contain. The results are recorded in record metadata.

use crate::provider::{ImageBlob, MeshBlob};
use image::ImageReader;
use protoform_core::{ProtoformError, Result};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub format: String,
    pub width: u32,
    pub height: u32,
}

/// Counts from a parsed glTF document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshReport {
    pub mesh_count: usize,
    pub primitive_count: usize,
    pub node_count: usize,
    pub material_count: usize,
}

impl MeshReport {
    pub fn summary(&self) -> String {
        format!(
            "{} meshes, {} primitives, {} nodes, {} materials",
            self.mesh_count, self.primitive_count, self.node_count, self.material_count
        )
    }
}

/// Read format and dimensions without decoding pixels
pub fn inspect_image(blob: &ImageBlob) -> Result<ImageInfo> {
    let reader = ImageReader::new(Cursor::new(&blob.bytes)).with_guessed_format()?;
    let format = reader
        .format()
        .ok_or_else(|| ProtoformError::InvalidInput("unrecognised image format".to_string()))?;
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| ProtoformError::InvalidInput(format!("unreadable image: {}", e)))?;

    Ok(ImageInfo {
        format: format!("{:?}", format).to_lowercase(),
        width,
        height,
    })
}

/// Parse a mesh blob as glTF (binary or JSON) and count its contents
pub fn inspect_mesh(blob: &MeshBlob) -> Result<MeshReport> {
    let gltf = gltf::Gltf::from_slice(&blob.bytes)
        .map_err(|e| ProtoformError::generation(format!("model is not valid glTF: {}", e)))?;

    Ok(MeshReport {
        mesh_count: gltf.meshes().count(),
        primitive_count: gltf.meshes().map(|m| m.primitives().count()).sum(),
        node_count: gltf.nodes().count(),
        material_count: gltf.materials().count(),
    })
}
