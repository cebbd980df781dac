//! Error types for Protoform

use crate::id::RecordId;
use thiserror::Error;

/// The main error type for Protoform operations
#[derive(Debug, Error)]
pub enum ProtoformError {
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Upstream timed out: {0}")]
    UpstreamTimeout(String),

    #[error("Generation failed: {reason}")]
    GenerationFailed { reason: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Record not found: {0}")]
    NotFound(RecordId),

    #[error("Store write failed: {0}")]
    StoreWriteFailed(String),

    #[error("Store read failed: {0}")]
    StoreReadFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtoformError {
    /// Shorthand for a `GenerationFailed` error
    pub fn generation(reason: impl Into<String>) -> Self {
        ProtoformError::GenerationFailed {
            reason: reason.into(),
        }
    }

    /// True for connectivity and timeout failures, the errors worth a manual retry
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            ProtoformError::UpstreamUnavailable(_) | ProtoformError::UpstreamTimeout(_)
        )
    }
}

/// Result type alias for Protoform operations
pub type Result<T> = std::result::Result<T, ProtoformError>;

impl From<toml::de::Error> for ProtoformError {
    fn from(err: toml::de::Error) -> Self {
        ProtoformError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for ProtoformError {
    fn from(err: toml::ser::Error) -> Self {
        ProtoformError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for ProtoformError {
    fn from(err: serde_json::Error) -> Self {
        ProtoformError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_shorthand() {
        let err = ProtoformError::generation("HTTP 500");
        assert_eq!(err.to_string(), "Generation failed: HTTP 500");
    }

    #[test]
    fn test_upstream_classification() {
        assert!(ProtoformError::UpstreamTimeout("ollama".into()).is_upstream());
        assert!(ProtoformError::UpstreamUnavailable("fabric".into()).is_upstream());
        assert!(!ProtoformError::InvalidInput("empty".into()).is_upstream());
        assert!(!ProtoformError::NotFound(RecordId::from_raw(3)).is_upstream());
    }
}
