//! Meshy image-to-3D provider
//!
//! Model generation is long-running (~1-3 min): `image_to_model` submits a
//! task, polls it until it settles, then downloads the GLB.

use crate::config::ProtoformConfig;
use crate::http::{encode_base64, HttpClient};
use crate::provider::*;
use protoform_core::{ProtoformError, Result};
use std::time::Duration;

const DEFAULT_MESHY_URL: &str = "https://api.meshy.ai/openapi/v1/image-to-3d";
const POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_POLL_ATTEMPTS: u32 = 120;

/// Meshy provider for image-to-3D
pub struct MeshyProvider {
    http: HttpClient,
    api_key: String,
    api_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshyTaskStatus {
    Processing(u8),
    Complete {
        model_url: Option<String>,
        video_url: Option<String>,
    },
    Failed(String),
}

impl MeshyProvider {
    pub fn from_config(config: &ProtoformConfig) -> Result<Self> {
        let api_key = config
            .api_key("meshy")
            .ok_or_else(|| {
                ProtoformError::Config(
                    "Meshy API key not configured. Set PROTOFORM_MESHY_API_KEY or add to .protoform/config.toml".to_string(),
                )
            })?
            .to_string();

        let api_url = config
            .api_url("meshy")
            .unwrap_or(DEFAULT_MESHY_URL)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            http: HttpClient::new("meshy", config.timeout("meshy"), config.retry_policy("meshy")),
            api_key,
            api_url,
        })
    }

    fn auth(&self) -> String {
        format!("Bearer {}", self.api_key)
    }

    /// Submit an image-to-3d task and return the task ID
    fn submit_task(&self, image: &ImageBlob) -> Result<String> {
        let payload = serde_json::json!({
            "image_url": format!("data:{};base64,{}", image.mime_type(), encode_base64(&image.bytes)),
            "enable_pbr": true,
            "should_remesh": true
        });

        let response = self.http.post_json(&self.api_url, Some(&self.auth()), &payload)?;
        parse_meshy_submit(&response)
    }

    fn poll_task(&self, task_id: &str) -> Result<MeshyTaskStatus> {
        let url = format!("{}/{}", self.api_url, task_id);
        let response = self.http.get_json(&url, Some(&self.auth()))?;
        Ok(parse_meshy_poll(&response))
    }
}

impl GenerationProvider for MeshyProvider {
    fn name(&self) -> &str {
        "meshy"
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::ImageToModel]
    }

    fn health_check(&self) -> Result<ProviderStatus> {
        if self.api_key.is_empty() {
            return Ok(ProviderStatus::NoApiKey);
        }
        Ok(ProviderStatus::Available)
    }

    fn image_to_model(&self, image: &ImageBlob) -> Result<MeshBlob> {
        let task_id = self.submit_task(image)?;
        tracing::info!(task_id = %task_id, "Submitted meshy task");

        for _ in 0..MAX_POLL_ATTEMPTS {
            std::thread::sleep(POLL_INTERVAL);

            match self.poll_task(&task_id)? {
                MeshyTaskStatus::Processing(progress) => {
                    tracing::debug!(task_id = %task_id, progress, "meshy task processing");
                }
                MeshyTaskStatus::Complete {
                    model_url,
                    video_url,
                } => {
                    let url = model_url.ok_or_else(|| {
                        ProtoformError::generation("No GLB URL in meshy completion response")
                    })?;
                    let mut mesh = MeshBlob::new(self.http.get_bytes(&url)?);
                    if let Some(video_url) = video_url {
                        match self.http.get_bytes(&video_url) {
                            Ok(video) => mesh.preview_video = Some(video),
                            Err(e) => {
                                tracing::warn!(error = %e, "Could not fetch meshy preview video")
                            }
                        }
                    }
                    return Ok(mesh);
                }
                MeshyTaskStatus::Failed(msg) => {
                    return Err(ProtoformError::generation(format!(
                        "Meshy generation failed: {}",
                        msg
                    )));
                }
            }
        }

        Err(ProtoformError::UpstreamTimeout(format!(
            "meshy task {} still running after {} polls",
            task_id, MAX_POLL_ATTEMPTS
        )))
    }
}

/// Task ID from a submit reply
pub fn parse_meshy_submit(response: &serde_json::Value) -> Result<String> {
    response
        .get("result")
        .and_then(|r| r.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ProtoformError::generation("No task ID in meshy response"))
}

/// Task state from a poll reply
pub fn parse_meshy_poll(response: &serde_json::Value) -> MeshyTaskStatus {
    let status = response
        .get("status")
        .and_then(|s| s.as_str())
        .unwrap_or("UNKNOWN");

    match status {
        "SUCCEEDED" => MeshyTaskStatus::Complete {
            model_url: response
                .get("model_urls")
                .and_then(|u| u.get("glb"))
                .and_then(|u| u.as_str())
                .map(|s| s.to_string()),
            video_url: response
                .get("video_url")
                .and_then(|u| u.as_str())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string()),
        },
        "FAILED" | "EXPIRED" | "CANCELED" => MeshyTaskStatus::Failed(
            response
                .get("task_error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .filter(|m| !m.is_empty())
                .unwrap_or("Unknown error")
                .to_string(),
        ),
        _ => MeshyTaskStatus::Processing(
            response
                .get("progress")
                .and_then(|p| p.as_u64())
                .unwrap_or(0)
                .min(100) as u8,
        ),
    }
}
