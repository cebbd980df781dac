//! Generation provider trait and blob types

use image::ImageFormat;
use protoform_core::{ProtoformError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A remote capability a provider can serve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    TextToImage,
    ImageToModel,
}

impl Capability {
    /// Config key for this capability's endpoint
    pub fn key(&self) -> &'static str {
        match self {
            Capability::TextToImage => "text_to_image",
            Capability::ImageToModel => "image_to_model",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::TextToImage => write!(f, "text-to-image"),
            Capability::ImageToModel => write!(f, "image-to-3D"),
        }
    }
}

/// Raw image bytes as returned by a text-to-image provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBlob {
    pub bytes: Vec<u8>,
}

impl ImageBlob {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Format sniffed from the magic bytes, `None` if not a known image
    pub fn format(&self) -> Option<ImageFormat> {
        image::guess_format(&self.bytes).ok()
    }

    /// File extension matching the sniffed format
    pub fn extension(&self) -> &'static str {
        self.format()
            .and_then(|f| f.extensions_str().first().copied())
            .unwrap_or("png")
    }

    /// MIME type for data URIs
    pub fn mime_type(&self) -> &'static str {
        self.format().map(|f| f.to_mime_type()).unwrap_or("image/png")
    }
}

/// A generated mesh, treated as an opaque binary glTF payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshBlob {
    pub bytes: Vec<u8>,
    /// Turntable preview video, when the provider renders one
    pub preview_video: Option<Vec<u8>>,
}

impl MeshBlob {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            preview_video: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// True if the payload starts with the binary glTF magic
    pub fn is_glb(&self) -> bool {
        self.bytes.starts_with(b"glTF")
    }
}

/// Status returned by a provider health check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderStatus {
    Available,
    Unavailable(String),
    NoApiKey,
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderStatus::Available => write!(f, "available"),
            ProviderStatus::Unavailable(reason) => write!(f, "unavailable ({})", reason),
            ProviderStatus::NoApiKey => write!(f, "no API key"),
        }
    }
}

/// Trait implemented by each generation provider (Fabric, Flux, Meshy, Mock).
///
/// Calls block until the provider has produced a result. Credentials stay
/// inside the implementation.
pub trait GenerationProvider: Send + Sync {
    /// Provider name (e.g. "fabric", "flux", "meshy", "mock")
    fn name(&self) -> &str;

    fn capabilities(&self) -> Vec<Capability>;

    fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Check if the provider is usable (API key set, endpoint configured)
    fn health_check(&self) -> Result<ProviderStatus>;

    fn text_to_image(&self, _prompt: &str) -> Result<ImageBlob> {
        Err(unsupported(self.name(), Capability::TextToImage))
    }

    fn image_to_model(&self, _image: &ImageBlob) -> Result<MeshBlob> {
        Err(unsupported(self.name(), Capability::ImageToModel))
    }
}

pub(crate) fn unsupported(provider: &str, capability: Capability) -> ProtoformError {
    ProtoformError::Config(format!(
        "Provider '{}' does not support {}",
        provider, capability
    ))
}
