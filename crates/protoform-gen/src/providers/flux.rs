//! Flux image generation provider (fal.ai)
//!
//! Images are fast (~10s) so the synchronous endpoint is used and the call
//! blocks until the image URL is returned, then downloads it.

use crate::config::ProtoformConfig;
use crate::http::HttpClient;
use crate::provider::*;
use protoform_core::{ProtoformError, Result};

const DEFAULT_FLUX_URL: &str = "https://fal.run/fal-ai/flux/dev";

/// Flux provider for text-to-image via fal.ai
pub struct FluxProvider {
    http: HttpClient,
    api_key: String,
    api_url: String,
}

impl FluxProvider {
    pub fn from_config(config: &ProtoformConfig) -> Result<Self> {
        let api_key = config
            .api_key("flux")
            .ok_or_else(|| {
                ProtoformError::Config(
                    "Flux API key not configured. Set PROTOFORM_FLUX_API_KEY or add to .protoform/config.toml".to_string(),
                )
            })?
            .to_string();

        let api_url = config
            .api_url("flux")
            .unwrap_or(DEFAULT_FLUX_URL)
            .to_string();

        Ok(Self {
            http: HttpClient::new("flux", config.timeout("flux"), config.retry_policy("flux")),
            api_key,
            api_url,
        })
    }
}

impl GenerationProvider for FluxProvider {
    fn name(&self) -> &str {
        "flux"
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::TextToImage]
    }

    fn health_check(&self) -> Result<ProviderStatus> {
        if self.api_key.is_empty() {
            return Ok(ProviderStatus::NoApiKey);
        }
        Ok(ProviderStatus::Available)
    }

    fn text_to_image(&self, prompt: &str) -> Result<ImageBlob> {
        let payload = serde_json::json!({
            "prompt": prompt,
            "image_size": "square_hd",
            "num_images": 1,
            "output_format": "png",
            "enable_safety_checker": true
        });

        let auth = format!("Key {}", self.api_key);
        let response = self.http.post_json(&self.api_url, Some(&auth), &payload)?;
        let image_url = parse_flux_response(&response)?;
        if let Some(seed) = response.get("seed").and_then(|s| s.as_u64()) {
            tracing::debug!(seed, "flux image generated");
        }

        Ok(ImageBlob::new(self.http.fetch_payload(&image_url)?))
    }
}

/// First image URL in a Flux reply
pub fn parse_flux_response(response: &serde_json::Value) -> Result<String> {
    response
        .get("images")
        .and_then(|imgs| imgs.as_array())
        .and_then(|arr| arr.first())
        .and_then(|img| img.get("url"))
        .and_then(|u| u.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ProtoformError::generation("No image URL in Flux response"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flux_response() {
        let json = serde_json::json!({
            "images": [
                {
                    "url": "https://example.com/generated.png",
                    "width": 1024,
                    "height": 1024,
                    "content_type": "image/png"
                }
            ],
            "seed": 42,
            "has_nsfw_concepts": [false],
            "prompt": "a brick wall"
        });
        assert_eq!(
            parse_flux_response(&json).unwrap(),
            "https://example.com/generated.png"
        );
    }

    #[test]
    fn test_parse_flux_response_invalid() {
        let json = serde_json::json!({"detail": "something went wrong"});
        assert!(parse_flux_response(&json).is_err());
        let json = serde_json::json!({"images": []});
        assert!(parse_flux_response(&json).is_err());
    }

    #[test]
    fn test_flux_requires_api_key() {
        let config = ProtoformConfig::default();
        assert!(matches!(
            FluxProvider::from_config(&config),
            Err(ProtoformError::Config(_))
        ));
    }
}
