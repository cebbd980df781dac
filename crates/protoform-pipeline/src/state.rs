//! Pipeline stages, run states and results

use protoform_core::{GenerationRecord, ProtoformError, RecordId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A unit of work that can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Reading the stored record a resume or edit starts from
    Loading,
    Enhancing,
    ImageGenerating,
    ModelGenerating,
    Persisting,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Loading => "loading",
            Stage::Enhancing => "enhancing",
            Stage::ImageGenerating => "image_generating",
            Stage::ModelGenerating => "model_generating",
            Stage::Persisting => "persisting",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Loading => "loading record",
            Stage::Enhancing => "prompt enhancement",
            Stage::ImageGenerating => "image generation",
            Stage::ModelGenerating => "3D model generation",
            Stage::Persisting => "saving record",
        };
        f.write_str(name)
    }
}

/// Where a run is. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Start,
    Enhancing,
    ImageGenerating,
    ModelGenerating,
    Persisting,
    Done,
    Failed { stage: Stage, reason: String },
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed { .. })
    }

    /// The state a stage runs in
    pub fn of_stage(stage: Stage) -> Self {
        match stage {
            Stage::Loading => PipelineState::Start,
            Stage::Enhancing => PipelineState::Enhancing,
            Stage::ImageGenerating => PipelineState::ImageGenerating,
            Stage::ModelGenerating => PipelineState::ModelGenerating,
            Stage::Persisting => PipelineState::Persisting,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Start => write!(f, "start"),
            PipelineState::Enhancing => write!(f, "enhancing prompt"),
            PipelineState::ImageGenerating => write!(f, "generating image"),
            PipelineState::ModelGenerating => write!(f, "generating 3D model"),
            PipelineState::Persisting => write!(f, "saving record"),
            PipelineState::Done => write!(f, "done"),
            PipelineState::Failed { stage, reason } => write!(f, "failed at {}: {}", stage, reason),
        }
    }
}

/// A run that reached `Done`
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub request_id: String,
    /// The record as stored after the run
    pub record: GenerationRecord,
    /// Every state the run passed through, `Start` through `Done`
    pub states: Vec<PipelineState>,
    /// Enhancement failed and the raw prompt was used instead
    pub enhance_fallback: bool,
}

/// A run that stopped at `stage`.
///
/// `record_id` names the record holding whatever did succeed (a new partial
/// record, or the record being resumed). `persist_error` is set when saving
/// that partial record failed too.
#[derive(Debug, Error)]
#[error("{stage} failed: {error}")]
pub struct PipelineFailure {
    pub request_id: String,
    pub stage: Stage,
    pub error: ProtoformError,
    pub record_id: Option<RecordId>,
    pub persist_error: Option<ProtoformError>,
    pub states: Vec<PipelineState>,
}

impl PipelineFailure {
    /// True if re-running may help (connectivity or timeout)
    pub fn is_retryable(&self) -> bool {
        self.error.is_upstream()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(PipelineState::Done.is_terminal());
        assert!(PipelineState::Failed {
            stage: Stage::ImageGenerating,
            reason: "HTTP 500".into()
        }
        .is_terminal());
        assert!(!PipelineState::Persisting.is_terminal());
        assert_eq!(
            PipelineState::of_stage(Stage::ModelGenerating),
            PipelineState::ModelGenerating
        );
    }

    #[test]
    fn test_failure_message_names_stage() {
        let failure = PipelineFailure {
            request_id: "abc".into(),
            stage: Stage::ImageGenerating,
            error: ProtoformError::UpstreamTimeout("fabric did not respond in time".into()),
            record_id: Some(RecordId(3)),
            persist_error: None,
            states: vec![],
        };
        assert_eq!(
            failure.to_string(),
            "image generation failed: Upstream timed out: fabric did not respond in time"
        );
        assert!(failure.is_retryable());
    }

    #[test]
    fn test_stage_serializes_snake_case() {
        let json = serde_json::to_string(&Stage::ModelGenerating).unwrap();
        assert_eq!(json, "\"model_generating\"");
        assert_eq!(Stage::ModelGenerating.as_str(), "model_generating");
    }
}
