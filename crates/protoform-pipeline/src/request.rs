//! Request-scoped inputs to a pipeline run

use protoform_core::{ProtoformError, Result};

/// Everything one run needs from the caller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Earlier prompts offered to the enhancer for consistency
    pub context: Vec<String>,
    pub tags: Vec<String>,
    /// Also offer the closest stored prompt as context
    pub use_history_context: bool,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_context(mut self, context: Vec<String>) -> Self {
        self.context = context;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_history_context(mut self, enabled: bool) -> Self {
        self.use_history_context = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(ProtoformError::InvalidInput(
                "prompt must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
