//! Protoform Gen - prompt enhancement and generation providers
//!
//! A pluggable provider framework for the two remote stages of the pipeline
//! (text-to-image, image-to-3D), the language-model prompt enhancer in front
//! of them, layered configuration, and asset file handling.

pub mod assets;
pub mod client;
pub mod config;
pub mod enhancer;
mod http;
pub mod provider;
pub mod providers;
pub mod validate;

pub use assets::{AssetWriter, StoredAsset};
pub use client::GenerationClient;
pub use config::{EnhanceFailurePolicy, PartialRecordPolicy, ProtoformConfig};
pub use enhancer::{create_enhancer, MockEnhancer, OllamaEnhancer, PromptEnhancer};
pub use http::RetryPolicy;
pub use provider::{Capability, GenerationProvider, ImageBlob, MeshBlob, ProviderStatus};
pub use validate::{ImageInfo, MeshReport};
