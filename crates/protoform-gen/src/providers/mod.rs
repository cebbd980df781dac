//! Provider registry
//!
//! Maps provider names to concrete implementations.

pub mod fabric;
pub mod flux;
pub mod meshy;
pub mod mock;

use crate::config::ProtoformConfig;
use crate::provider::GenerationProvider;
use protoform_core::{ProtoformError, Result};

/// Create a provider by name with configuration
pub fn create_provider(
    name: &str,
    config: &ProtoformConfig,
) -> Result<Box<dyn GenerationProvider>> {
    if !config.is_enabled(name) {
        return Err(ProtoformError::Config(format!(
            "Provider '{}' is disabled in config",
            name
        )));
    }

    match name {
        "mock" => Ok(Box::new(mock::MockProvider::new())),
        "fabric" => Ok(Box::new(fabric::FabricProvider::from_config(config))),
        "flux" => Ok(Box::new(flux::FluxProvider::from_config(config)?)),
        "meshy" => Ok(Box::new(meshy::MeshyProvider::from_config(config)?)),
        _ => Err(ProtoformError::Config(format!(
            "Unknown provider '{}'. Available: {}",
            name,
            available_providers().join(", ")
        ))),
    }
}

/// List all available provider names
pub fn available_providers() -> Vec<&'static str> {
    vec!["mock", "fabric", "flux", "meshy"]
}
