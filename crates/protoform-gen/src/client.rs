//! The generation client: one provider per pipeline capability

use crate::config::ProtoformConfig;
use crate::provider::{Capability, GenerationProvider, ImageBlob, MeshBlob, ProviderStatus};
use crate::providers::create_provider;
use protoform_core::{ProtoformError, Result};

/// Runs text-to-image and image-to-3D calls against the configured providers.
///
/// Every call is independent: nothing is cached, deduplicated or batched.
pub struct GenerationClient {
    image_provider: Box<dyn GenerationProvider>,
    model_provider: Box<dyn GenerationProvider>,
}

impl GenerationClient {
    /// Pair two providers, checking each serves its stage
    pub fn new(
        image_provider: Box<dyn GenerationProvider>,
        model_provider: Box<dyn GenerationProvider>,
    ) -> Result<Self> {
        for (provider, capability) in [
            (&image_provider, Capability::TextToImage),
            (&model_provider, Capability::ImageToModel),
        ] {
            if !provider.supports(capability) {
                return Err(ProtoformError::Config(format!(
                    "Provider '{}' cannot serve {}",
                    provider.name(),
                    capability
                )));
            }
        }
        Ok(Self {
            image_provider,
            model_provider,
        })
    }

    pub fn from_config(config: &ProtoformConfig) -> Result<Self> {
        let image = create_provider(&config.generation.image_provider, config)?;
        let model = create_provider(&config.generation.model_provider, config)?;
        Self::new(image, model)
    }

    pub fn image_provider_name(&self) -> &str {
        self.image_provider.name()
    }

    pub fn model_provider_name(&self) -> &str {
        self.model_provider.name()
    }

    /// Health of the image and model providers, in that order
    pub fn health(&self) -> Vec<(String, Capability, ProviderStatus)> {
        [
            (&self.image_provider, Capability::TextToImage),
            (&self.model_provider, Capability::ImageToModel),
        ]
        .into_iter()
        .map(|(provider, capability)| {
            let status = provider
                .health_check()
                .unwrap_or_else(|e| ProviderStatus::Unavailable(e.to_string()));
            (provider.name().to_string(), capability, status)
        })
        .collect()
    }

    pub fn text_to_image(&self, prompt: &str) -> Result<ImageBlob> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(ProtoformError::InvalidInput(
                "image prompt must not be empty".to_string(),
            ));
        }

        let blob = self.image_provider.text_to_image(prompt)?;
        if blob.is_empty() || blob.format().is_none() {
            return Err(ProtoformError::generation(format!(
                "{} returned {} bytes that are not a recognised image",
                self.image_provider.name(),
                blob.bytes.len()
            )));
        }
        tracing::debug!(
            provider = self.image_provider.name(),
            bytes = blob.bytes.len(),
            "Image generated"
        );
        Ok(blob)
    }

    pub fn image_to_model(&self, image: &ImageBlob) -> Result<MeshBlob> {
        if image.is_empty() {
            return Err(ProtoformError::InvalidInput("image is empty".to_string()));
        }
        if image.format().is_none() {
            return Err(ProtoformError::InvalidInput(
                "image is not a recognised format".to_string(),
            ));
        }

        let mesh = self.model_provider.image_to_model(image)?;
        if mesh.is_empty() {
            return Err(ProtoformError::generation(format!(
                "{} returned an empty model",
                self.model_provider.name()
            )));
        }
        tracing::debug!(
            provider = self.model_provider.name(),
            bytes = mesh.bytes.len(),
            glb = mesh.is_glb(),
            "Model generated"
        );
        Ok(mesh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockProvider;

    /// Answers with whatever bytes it was built with
    struct FixedProvider {
        image: Vec<u8>,
    }

    impl GenerationProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }
        fn capabilities(&self) -> Vec<Capability> {
            vec![Capability::TextToImage]
        }
        fn health_check(&self) -> Result<ProviderStatus> {
            Err(ProtoformError::Config("broken".into()))
        }
        fn text_to_image(&self, _prompt: &str) -> Result<ImageBlob> {
            Ok(ImageBlob::new(self.image.clone()))
        }
    }

    fn mock_client() -> GenerationClient {
        GenerationClient::new(Box::new(MockProvider::new()), Box::new(MockProvider::new())).unwrap()
    }

    #[test]
    fn test_mock_round_through_both_stages() {
        let client = mock_client();
        let image = client.text_to_image("a copper teapot").unwrap();
        let mesh = client.image_to_model(&image).unwrap();
        assert!(mesh.is_glb());
        assert_eq!(client.image_provider_name(), "mock");
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        let client = mock_client();
        assert!(matches!(
            client.text_to_image("   "),
            Err(ProtoformError::InvalidInput(_))
        ));
        assert!(matches!(
            client.image_to_model(&ImageBlob::new(Vec::new())),
            Err(ProtoformError::InvalidInput(_))
        ));
        assert!(matches!(
            client.image_to_model(&ImageBlob::new(b"definitely not an image".to_vec())),
            Err(ProtoformError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_garbage_image_from_provider_is_generation_failure() {
        let client = GenerationClient::new(
            Box::new(FixedProvider {
                image: b"<html>rate limited</html>".to_vec(),
            }),
            Box::new(MockProvider::new()),
        )
        .unwrap();
        assert!(matches!(
            client.text_to_image("a fox"),
            Err(ProtoformError::GenerationFailed { .. })
        ));
    }

    #[test]
    fn test_capabilities_checked_on_construction() {
        let result = GenerationClient::new(
            Box::new(MockProvider::new()),
            Box::new(FixedProvider { image: Vec::new() }),
        );
        assert!(matches!(result, Err(ProtoformError::Config(_))));
    }

    #[test]
    fn test_health_reports_errors_as_unavailable() {
        let client = GenerationClient::new(
            Box::new(FixedProvider { image: Vec::new() }),
            Box::new(MockProvider::new()),
        )
        .unwrap();
        let health = client.health();
        assert_eq!(health.len(), 2);
        assert_eq!(health[0].0, "fixed");
        assert!(matches!(health[0].2, ProviderStatus::Unavailable(_)));
        assert_eq!(health[1].2, ProviderStatus::Available);
    }

    #[test]
    fn test_from_config_uses_named_providers() {
        let mut config = ProtoformConfig::default();
        config.generation.image_provider = "mock".into();
        config.generation.model_provider = "mock".into();
        let client = GenerationClient::from_config(&config).unwrap();
        assert_eq!(client.model_provider_name(), "mock");
    }
}
