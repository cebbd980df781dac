//! Fabric capability-endpoint provider
//!
//! Serves both pipeline stages through two JSON apps: text-to-image takes
//! `{"prompt"}` and answers `{"result"}`, image-to-3D takes
//! `{"input_image": <base64>}` and answers `{"generated_object",
//! "video_object"?}`. Result values are base64 payloads or download URLs.
//! Freshly started apps answer 404 until their resources are ready, so
//! requests retry per the provider's retry policy.

use crate::config::ProtoformConfig;
use crate::http::{encode_base64, HttpClient};
use crate::provider::*;
use protoform_core::{ProtoformError, Result};

const DEFAULT_TEXT_TO_IMAGE_URL: &str =
    "https://c25dcd829d134ea98f5ae4dd311d13bc.node3.openfabric.network/execution";
const DEFAULT_IMAGE_TO_MODEL_URL: &str =
    "https://f0b5f319156c4819b9827000b17e511a.node3.openfabric.network/execution";

pub struct FabricProvider {
    http: HttpClient,
    api_key: Option<String>,
    text_to_image_url: String,
    image_to_model_url: String,
}

impl FabricProvider {
    pub fn from_config(config: &ProtoformConfig) -> Self {
        let endpoint = |cap: Capability, default: &str| {
            config
                .endpoint("fabric", cap.key())
                .unwrap_or(default)
                .to_string()
        };

        Self {
            http: HttpClient::new(
                "fabric",
                config.timeout("fabric"),
                config.retry_policy("fabric"),
            ),
            api_key: config.api_key("fabric").map(str::to_string),
            text_to_image_url: endpoint(Capability::TextToImage, DEFAULT_TEXT_TO_IMAGE_URL),
            image_to_model_url: endpoint(Capability::ImageToModel, DEFAULT_IMAGE_TO_MODEL_URL),
        }
    }

    fn auth_header(&self) -> Option<String> {
        self.api_key.as_ref().map(|k| format!("Bearer {}", k))
    }
}

impl GenerationProvider for FabricProvider {
    fn name(&self) -> &str {
        "fabric"
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::TextToImage, Capability::ImageToModel]
    }

    fn health_check(&self) -> Result<ProviderStatus> {
        if self.text_to_image_url.is_empty() || self.image_to_model_url.is_empty() {
            return Ok(ProviderStatus::Unavailable(
                "capability endpoint not configured".to_string(),
            ));
        }
        Ok(ProviderStatus::Available)
    }

    fn text_to_image(&self, prompt: &str) -> Result<ImageBlob> {
        let payload = serde_json::json!({ "prompt": prompt });
        let auth = self.auth_header();
        let response = self
            .http
            .post_json(&self.text_to_image_url, auth.as_deref(), &payload)?;

        let result = parse_image_response(&response)?;
        let bytes = self.http.fetch_payload(&result)?;
        tracing::debug!(bytes = bytes.len(), "fabric image received");
        Ok(ImageBlob::new(bytes))
    }

    fn image_to_model(&self, image: &ImageBlob) -> Result<MeshBlob> {
        let payload = serde_json::json!({ "input_image": encode_base64(&image.bytes) });
        let auth = self.auth_header();
        let response = self
            .http
            .post_json(&self.image_to_model_url, auth.as_deref(), &payload)?;

        let (model_ref, video_ref) = parse_model_response(&response)?;
        let mut mesh = MeshBlob::new(self.http.fetch_payload(&model_ref)?);

        // The preview is a bonus; losing it does not fail the stage
        if let Some(video_ref) = video_ref {
            match self.http.fetch_payload(&video_ref) {
                Ok(video) => mesh.preview_video = Some(video),
                Err(e) => tracing::warn!(error = %e, "Could not fetch fabric preview video"),
            }
        }
        Ok(mesh)
    }
}

/// Pull the image reference out of a text-to-image reply
pub fn parse_image_response(response: &serde_json::Value) -> Result<String> {
    non_empty_str(response, "result").ok_or_else(|| {
        ProtoformError::generation(format!(
            "Unexpected fabric image response: {}",
            describe(response)
        ))
    })
}

/// Pull the model reference (and optional preview video) out of an
/// image-to-3D reply
pub fn parse_model_response(response: &serde_json::Value) -> Result<(String, Option<String>)> {
    let model = non_empty_str(response, "generated_object").ok_or_else(|| {
        ProtoformError::generation(format!(
            "Unexpected fabric model response: {}",
            describe(response)
        ))
    })?;
    Ok((model, non_empty_str(response, "video_object")))
}

fn non_empty_str(value: &serde_json::Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Field names only; payloads can be megabytes of base64
fn describe(value: &serde_json::Value) -> String {
    match value.as_object() {
        Some(map) => format!("fields {:?}", map.keys().collect::<Vec<_>>()),
        None => "not a JSON object".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;

    #[test]
    fn test_parse_image_response() {
        let json = serde_json::json!({ "result": "iVBORw0KGgo=" });
        assert_eq!(parse_image_response(&json).unwrap(), "iVBORw0KGgo=");

        let json = serde_json::json!({ "result": "" });
        assert!(parse_image_response(&json).is_err());

        let json = serde_json::json!({ "error": "Resource not found" });
        let err = parse_image_response(&json).unwrap_err();
        assert!(err.to_string().contains("error"));
    }

    #[test]
    fn test_parse_model_response() {
        let json = serde_json::json!({
            "generated_object": "https://cdn.example.com/model.glb",
            "video_object": "https://cdn.example.com/turntable.mp4"
        });
        let (model, video) = parse_model_response(&json).unwrap();
        assert_eq!(model, "https://cdn.example.com/model.glb");
        assert_eq!(video.as_deref(), Some("https://cdn.example.com/turntable.mp4"));

        let json = serde_json::json!({ "generated_object": "Z2xURg==" });
        let (_, video) = parse_model_response(&json).unwrap();
        assert!(video.is_none());

        assert!(parse_model_response(&serde_json::json!({ "video_object": "x" })).is_err());
        assert!(parse_model_response(&serde_json::json!(["not", "an", "object"])).is_err());
    }

    #[test]
    fn test_endpoints_come_from_config() {
        let mut config = ProtoformConfig::default();
        let mut fabric = ProviderConfig::default();
        fabric
            .endpoints
            .insert("image_to_model".into(), "https://i23d.example.com/run".into());
        fabric.api_key = Some("secret".into());
        config.providers.insert("fabric".into(), fabric);

        let provider = FabricProvider::from_config(&config);
        assert_eq!(provider.text_to_image_url, DEFAULT_TEXT_TO_IMAGE_URL);
        assert_eq!(provider.image_to_model_url, "https://i23d.example.com/run");
        assert_eq!(provider.auth_header().as_deref(), Some("Bearer secret"));
        assert_eq!(provider.health_check().unwrap(), ProviderStatus::Available);
    }
}
