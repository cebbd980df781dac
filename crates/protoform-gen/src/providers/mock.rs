//! Offline provider for tests and dry runs
//!
//! Produces a solid-colour PNG per prompt and a single-triangle GLB per
//! image, without any network calls.

use crate::provider::*;
use image::{ImageFormat, Rgba, RgbaImage};
use protoform_core::{ProtoformError, Result};
use std::io::Cursor;

const MOCK_IMAGE_SIZE: u32 = 64;

/// A provider that fabricates placeholder assets locally
#[derive(Debug, Default)]
pub struct MockProvider;

impl MockProvider {
    pub fn new() -> Self {
        Self
    }
}

impl GenerationProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::TextToImage, Capability::ImageToModel]
    }

    fn health_check(&self) -> Result<ProviderStatus> {
        Ok(ProviderStatus::Available)
    }

    fn text_to_image(&self, prompt: &str) -> Result<ImageBlob> {
        Ok(ImageBlob::new(solid_png(prompt, MOCK_IMAGE_SIZE)?))
    }

    fn image_to_model(&self, _image: &ImageBlob) -> Result<MeshBlob> {
        Ok(MeshBlob::new(minimal_glb()?))
    }
}

/// Solid PNG whose colour is derived from the prompt text
pub fn solid_png(prompt: &str, size: u32) -> Result<Vec<u8>> {
    let hash_val = prompt
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    let colour = Rgba([
        ((hash_val >> 16) & 0xFF) as u8,
        ((hash_val >> 8) & 0xFF) as u8,
        (hash_val & 0xFF) as u8,
        255,
    ]);

    let img = RgbaImage::from_pixel(size, size, colour);
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| ProtoformError::generation(format!("Failed to encode PNG: {}", e)))?;
    Ok(bytes)
}

/// Smallest valid binary glTF: one mesh, one triangle
pub fn minimal_glb() -> Result<Vec<u8>> {
    let json = serde_json::json!({
        "asset": { "version": "2.0", "generator": "protoform-mock" },
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [{ "mesh": 0 }],
        "meshes": [{
            "primitives": [{
                "attributes": { "POSITION": 0 },
                "indices": 1
            }]
        }],
        "accessors": [
            {
                "bufferView": 0,
                "componentType": 5126,
                "count": 3,
                "type": "VEC3",
                "max": [1.0, 1.0, 0.0],
                "min": [-1.0, 0.0, 0.0]
            },
            {
                "bufferView": 1,
                "componentType": 5123,
                "count": 3,
                "type": "SCALAR",
                "max": [2],
                "min": [0]
            }
        ],
        "bufferViews": [
            { "buffer": 0, "byteOffset": 0, "byteLength": 36, "target": 34962 },
            { "buffer": 0, "byteOffset": 36, "byteLength": 6, "target": 34963 }
        ],
        "buffers": [{ "byteLength": 44 }]
    });

    // Chunks are 4-byte aligned: JSON pads with spaces, BIN with zeros
    let mut json_chunk = serde_json::to_vec(&json)?;
    json_chunk.resize((json_chunk.len() + 3) & !3, b' ');

    let vertices: [f32; 9] = [-1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
    let indices: [u16; 3] = [0, 1, 2];
    let mut bin_chunk = Vec::with_capacity(44);
    for v in vertices {
        bin_chunk.extend_from_slice(&v.to_le_bytes());
    }
    for i in indices {
        bin_chunk.extend_from_slice(&i.to_le_bytes());
    }
    bin_chunk.resize((bin_chunk.len() + 3) & !3, 0);

    let total_len = 12 + 8 + json_chunk.len() + 8 + bin_chunk.len();
    let mut glb = Vec::with_capacity(total_len);
    glb.extend_from_slice(b"glTF");
    glb.extend_from_slice(&2u32.to_le_bytes());
    glb.extend_from_slice(&(total_len as u32).to_le_bytes());

    glb.extend_from_slice(&(json_chunk.len() as u32).to_le_bytes());
    glb.extend_from_slice(b"JSON");
    glb.extend_from_slice(&json_chunk);

    glb.extend_from_slice(&(bin_chunk.len() as u32).to_le_bytes());
    glb.extend_from_slice(b"BIN\0");
    glb.extend_from_slice(&bin_chunk);

    Ok(glb)
}
