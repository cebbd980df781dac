//! Prompt enhancement through a local language model
//!
//! A raw prompt is wrapped in an art-director instruction and sent to the
//! model; its reply becomes the prompt the image provider sees. Enhancement
//! never retries and never silently falls back, that decision belongs to
//! the caller.

use crate::config::{EnhancerConfig, ProtoformConfig};
use crate::http::{HttpClient, RetryPolicy};
use crate::provider::ProviderStatus;
use protoform_core::{ProtoformError, Result};
use std::time::Duration;

/// Turns short prompts into detailed image-generation prompts
pub trait PromptEnhancer: Send + Sync {
    fn name(&self) -> &str;

    fn health_check(&self) -> Result<ProviderStatus>;

    /// Elaborate `raw_prompt`; prior prompts in `context` are offered to the
    /// model for consistency
    fn enhance(&self, raw_prompt: &str, context: &[String]) -> Result<String>;

    /// Rewrite `current_prompt` so only what `edit_request` names changes
    fn enhance_edit(&self, current_prompt: &str, edit_request: &str) -> Result<String>;
}

const ENHANCE_INSTRUCTION: &str = "\
You are an art director writing prompts for an image generator.
Rewrite the user's prompt into one vivid description of a single subject.
Add concrete visual detail: lighting and time of day, colour palette,
surface materials and textures, camera angle and framing, rendering style.
Keep the subject and intent of the original prompt unchanged.
Reply with the new prompt only, no explanation, at most 60 words.";

const EDIT_INSTRUCTION: &str = "\
You are editing an image-generation prompt.
Apply the requested change and nothing else: keep every element, style and
composition detail of the current prompt that the change does not mention,
do not add new major elements, and do not alter the main subject.
Reply with the new prompt only, no explanation, at most 60 words.";

/// Build the instruction sent for a fresh prompt
pub fn build_enhance_instruction(raw_prompt: &str, context: &[String]) -> String {
    let mut instruction = String::from(ENHANCE_INSTRUCTION);
    let context: Vec<&str> = context
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect();
    if !context.is_empty() {
        instruction.push_str("\n\nEarlier prompts in this session, keep recurring characters and objects consistent with them:\n");
        for prior in context {
            instruction.push_str("- ");
            instruction.push_str(prior);
            instruction.push('\n');
        }
    }
    instruction.push_str("\n\nUser prompt: ");
    instruction.push_str(raw_prompt.trim());
    instruction.push_str("\nEnhanced prompt:");
    instruction
}

/// Build the instruction sent for an edit of an existing prompt
pub fn build_edit_instruction(current_prompt: &str, edit_request: &str) -> String {
    format!(
        "{}\n\nCurrent prompt: \"{}\"\nRequested change: \"{}\"\nNew prompt:",
        EDIT_INSTRUCTION,
        current_prompt.trim(),
        edit_request.trim()
    )
}

fn require_text(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ProtoformError::InvalidInput(format!("{} must not be empty", what)));
    }
    Ok(())
}

/// Create the enhancer named in the config
pub fn create_enhancer(config: &ProtoformConfig) -> Result<Box<dyn PromptEnhancer>> {
    match config.enhancer.provider.as_str() {
        "ollama" => Ok(Box::new(OllamaEnhancer::from_config(&config.enhancer))),
        "mock" => Ok(Box::new(MockEnhancer)),
        other => Err(ProtoformError::Config(format!(
            "Unknown enhancer '{}'. Available: ollama, mock",
            other
        ))),
    }
}

/// Enhancer backed by an Ollama server's `/api/generate`
pub struct OllamaEnhancer {
    http: HttpClient,
    url: String,
    model: String,
}

impl OllamaEnhancer {
    pub fn new(url: &str, model: &str, timeout: Duration) -> Self {
        Self {
            http: HttpClient::new("ollama", timeout, RetryPolicy::none()),
            url: url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    pub fn from_config(config: &EnhancerConfig) -> Self {
        Self::new(
            &config.url,
            &config.model,
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn generate(&self, instruction: &str) -> Result<String> {
        let payload = serde_json::json!({
            "model": self.model,
            "prompt": instruction,
            "stream": false,
        });
        tracing::debug!(model = %self.model, chars = instruction.len(), "Requesting completion");
        let response = self
            .http
            .post_json(&format!("{}/api/generate", self.url), None, &payload)?;
        parse_ollama_response(&response)
    }
}

impl PromptEnhancer for OllamaEnhancer {
    fn name(&self) -> &str {
        "ollama"
    }

    fn health_check(&self) -> Result<ProviderStatus> {
        match self.http.get_json(&format!("{}/api/tags", self.url), None) {
            Ok(_) => Ok(ProviderStatus::Available),
            Err(e) => Ok(ProviderStatus::Unavailable(e.to_string())),
        }
    }

    fn enhance(&self, raw_prompt: &str, context: &[String]) -> Result<String> {
        require_text(raw_prompt, "prompt")?;
        self.generate(&build_enhance_instruction(raw_prompt, context))
    }

    fn enhance_edit(&self, current_prompt: &str, edit_request: &str) -> Result<String> {
        require_text(current_prompt, "current prompt")?;
        require_text(edit_request, "edit request")?;
        self.generate(&build_edit_instruction(current_prompt, edit_request))
    }
}

/// Extract the completion text, rejecting empty or error replies
pub fn parse_ollama_response(response: &serde_json::Value) -> Result<String> {
    if let Some(error) = response.get("error").and_then(|e| e.as_str()) {
        return Err(ProtoformError::generation(format!("ollama: {}", error)));
    }

    let text = response
        .get("response")
        .and_then(|r| r.as_str())
        .map(str::trim)
        .unwrap_or_default();
    if text.is_empty() {
        return Err(ProtoformError::generation(
            "ollama returned an empty completion",
        ));
    }
    Ok(text.to_string())
}

/// Offline enhancer with fixed, predictable output
#[derive(Debug, Default, Clone, Copy)]
pub struct MockEnhancer;

impl PromptEnhancer for MockEnhancer {
    fn name(&self) -> &str {
        "mock"
    }

    fn health_check(&self) -> Result<ProviderStatus> {
        Ok(ProviderStatus::Available)
    }

    fn enhance(&self, raw_prompt: &str, context: &[String]) -> Result<String> {
        require_text(raw_prompt, "prompt")?;
        let mut enhanced = format!(
            "{}, highly detailed, soft studio lighting, sharp focus",
            raw_prompt.trim()
        );
        if let Some(prior) = context.iter().rev().find(|c| !c.trim().is_empty()) {
            enhanced.push_str(", consistent with ");
            enhanced.push_str(prior.trim());
        }
        Ok(enhanced)
    }

    fn enhance_edit(&self, current_prompt: &str, edit_request: &str) -> Result<String> {
        require_text(current_prompt, "current prompt")?;
        require_text(edit_request, "edit request")?;
        Ok(format!("{}, {}", current_prompt.trim(), edit_request.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({
            "model": "llama3:latest",
            "created_at": "2025-01-30T14:05:00Z",
            "response": "  A crimson dragon perched on basalt cliffs at dusk.\n",
            "done": true
        });
        assert_eq!(
            parse_ollama_response(&json).unwrap(),
            "A crimson dragon perched on basalt cliffs at dusk."
        );
    }

    #[test]
    fn test_parse_ollama_response_keeps_text_verbatim() {
        let json = serde_json::json!({"response": "  \"a copper teapot, macro shot\"\n"});
        assert_eq!(
            parse_ollama_response(&json).unwrap(),
            "\"a copper teapot, macro shot\""
        );
    }

    #[test]
    fn test_parse_ollama_empty_or_error() {
        let empty = serde_json::json!({"response": "   ", "done": true});
        assert!(matches!(
            parse_ollama_response(&empty),
            Err(ProtoformError::GenerationFailed { .. })
        ));

        let missing = serde_json::json!({"done": true});
        assert!(parse_ollama_response(&missing).is_err());

        let error = serde_json::json!({"error": "model 'llama3' not found"});
        let err = parse_ollama_response(&error).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_instruction_includes_context() {
        let instruction = build_enhance_instruction(
            " a knight ",
            &["a knight in silver armour".to_string(), "  ".to_string()],
        );
        assert!(instruction.contains("- a knight in silver armour"));
        assert!(instruction.ends_with("User prompt: a knight\nEnhanced prompt:"));

        let bare = build_enhance_instruction("a knight", &[]);
        assert!(!bare.contains("Earlier prompts"));
    }

    #[test]
    fn test_edit_instruction_names_both_parts() {
        let instruction = build_edit_instruction("a red car", "make it blue");
        assert!(instruction.contains("Current prompt: \"a red car\""));
        assert!(instruction.contains("Requested change: \"make it blue\""));
    }

    #[test]
    fn test_empty_prompt_rejected_before_any_request() {
        // Nothing listens on port 9; validation must fail first
        let enhancer = OllamaEnhancer::new("http://127.0.0.1:9", "llama3", Duration::from_secs(1));
        assert!(matches!(
            enhancer.enhance("  ", &[]),
            Err(ProtoformError::InvalidInput(_))
        ));
        assert!(matches!(
            enhancer.enhance_edit("a cat", ""),
            Err(ProtoformError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_mock_enhancer() {
        let enhanced = MockEnhancer.enhance("a lighthouse", &[]).unwrap();
        assert!(enhanced.starts_with("a lighthouse,"));
        let with_context = MockEnhancer
            .enhance("a lighthouse", &["a stormy coast".to_string()])
            .unwrap();
        assert!(with_context.ends_with("consistent with a stormy coast"));
        assert_eq!(
            MockEnhancer.enhance_edit("a red car", "make it blue").unwrap(),
            "a red car, make it blue"
        );
        assert!(MockEnhancer.enhance("", &[]).is_err());
    }

    #[test]
    fn test_create_enhancer_by_name() {
        let mut config = ProtoformConfig::default();
        assert_eq!(create_enhancer(&config).unwrap().name(), "ollama");
        config.enhancer.provider = "mock".into();
        assert_eq!(create_enhancer(&config).unwrap().name(), "mock");
        config.enhancer.provider = "gpt".into();
        assert!(create_enhancer(&config).is_err());
    }
}
