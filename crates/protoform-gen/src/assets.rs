//! Writing generated blobs to the output directory

use crate::provider::{ImageBlob, MeshBlob};
use chrono::Utc;
use protoform_core::{ContentHash, Result};
use std::path::{Path, PathBuf};

/// A blob written to disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAsset {
    pub path: PathBuf,
    pub hash: ContentHash,
    pub size: usize,
}

impl StoredAsset {
    /// Path as stored on the record
    pub fn path_string(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// Saves images under `<root>/images` and models under `<root>/models`.
///
/// File names carry a timestamp and a short random suffix, so concurrent
/// runs never collide.
#[derive(Debug, Clone)]
pub struct AssetWriter {
    root: PathBuf,
}

impl AssetWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn save_image(&self, blob: &ImageBlob) -> Result<StoredAsset> {
        self.write("images", "generated", blob.extension(), &blob.bytes)
    }

    pub fn save_model(&self, blob: &MeshBlob) -> Result<StoredAsset> {
        self.write("models", "model", "glb", &blob.bytes)
    }

    pub fn save_preview(&self, video: &[u8]) -> Result<StoredAsset> {
        self.write("models", "preview", "mp4", video)
    }

    fn write(&self, subdir: &str, prefix: &str, ext: &str, bytes: &[u8]) -> Result<StoredAsset> {
        let dir = self.root.join(subdir);
        std::fs::create_dir_all(&dir)?;

        let path = dir.join(asset_file_name(prefix, ext));
        std::fs::write(&path, bytes)?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "Wrote asset");

        Ok(StoredAsset {
            path,
            hash: ContentHash::of(bytes),
            size: bytes.len(),
        })
    }
}

/// `{prefix}_{YYYYmmdd_HHMMSS}_{8 hex}.{ext}`
fn asset_file_name(prefix: &str, ext: &str) -> String {
    let short = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}.{}",
        prefix,
        Utc::now().format("%Y%m%d_%H%M%S"),
        &short[..8],
        ext
    )
}

/// Read an image back from a record's path
pub fn load_image(path: impl AsRef<Path>) -> Result<ImageBlob> {
    Ok(ImageBlob::new(std::fs::read(path)?))
}

pub fn load_model(path: impl AsRef<Path>) -> Result<MeshBlob> {
    Ok(MeshBlob::new(std::fs::read(path)?))
}

/// Delete an asset file; a file that is already gone is not an error.
/// Returns whether a file was removed.
pub fn remove_asset(path: impl AsRef<Path>) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
