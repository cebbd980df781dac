//! Generation records, their metadata and edit history

use crate::error::{ProtoformError, Result};
use crate::id::RecordId;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Current UTC time truncated to the millisecond precision the store keeps
pub fn now_utc() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Completion status, derived from which output paths are populated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Complete,
    ImageOnly,
    Incomplete,
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordStatus::Complete => write!(f, "complete"),
            RecordStatus::ImageOnly => write!(f, "image only"),
            RecordStatus::Incomplete => write!(f, "incomplete"),
        }
    }
}

/// One entry in a record's append-only edit history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditEntry {
    pub timestamp: DateTime<Utc>,
    pub field: String,
    #[serde(default)]
    pub old_value: Option<String>,
    #[serde(default)]
    pub new_value: Option<String>,
}

/// Open-ended metadata stored as JSON alongside each record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Edit history, oldest first. Only ever appended to.
    #[serde(default)]
    pub edit_history: Vec<EditEntry>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Anything else (content hashes, mesh stats, failure notes)
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RecordMetadata {
    pub fn with_tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut meta = Self::default();
        for tag in tags {
            meta.add_tag(tag);
        }
        meta
    }

    /// Add a tag, ignoring blanks and duplicates. Returns true if it was added.
    pub fn add_tag(&mut self, tag: impl Into<String>) -> bool {
        let tag = tag.into().trim().to_string();
        if tag.is_empty() || self.tags.contains(&tag) {
            return false;
        }
        self.tags.push(tag);
        true
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Set a free-form metadata value
    pub fn set_extra(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.extra.insert(key.to_string(), value.into());
    }

    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(|v| v.as_str())
    }
}

/// A change to one field of a stored record.
///
/// Every applied change appends an [`EditEntry`] before the field is written.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldChange {
    Prompt(String),
    EnhancedPrompt(Option<String>),
    ImagePath(Option<String>),
    ModelPath(Option<String>),
    Tags(Vec<String>),
}

impl FieldChange {
    /// Column / history name of the field this change targets
    pub fn field_name(&self) -> &'static str {
        match self {
            FieldChange::Prompt(_) => "prompt",
            FieldChange::EnhancedPrompt(_) => "enhanced_prompt",
            FieldChange::ImagePath(_) => "image_path",
            FieldChange::ModelPath(_) => "model_path",
            FieldChange::Tags(_) => "tags",
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            FieldChange::Prompt(p) if p.trim().is_empty() => Err(ProtoformError::InvalidInput(
                "prompt must not be empty".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// Input to `create`: everything except the store-assigned id
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub prompt: String,
    pub enhanced_prompt: Option<String>,
    pub image_path: Option<String>,
    pub model_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub metadata: RecordMetadata,
}

impl NewRecord {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            enhanced_prompt: None,
            image_path: None,
            model_path: None,
            created_at: now_utc(),
            metadata: RecordMetadata::default(),
        }
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

/// A persisted generation: one prompt's pipeline output and metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub id: RecordId,
    pub prompt: String,
    #[serde(default)]
    pub enhanced_prompt: Option<String>,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub model_path: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: RecordMetadata,
}

impl GenerationRecord {
    /// Attach a store-assigned id to a new record
    /// The record as the store hands it back: `created_at` is kept to
    /// millisecond precision.
    pub fn from_new(id: RecordId, new: NewRecord) -> Self {
        Self {
            id,
            prompt: new.prompt,
            enhanced_prompt: new.enhanced_prompt,
            image_path: new.image_path,
            model_path: new.model_path,
            created_at: new.created_at.trunc_subsecs(3),
            metadata: new.metadata,
        }
    }

    pub fn status(&self) -> RecordStatus {
        match (&self.image_path, &self.model_path) {
            (Some(_), Some(_)) => RecordStatus::Complete,
            (Some(_), None) => RecordStatus::ImageOnly,
            _ => RecordStatus::Incomplete,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status() == RecordStatus::Complete
    }

    /// The prompt the image should be generated from
    pub fn effective_prompt(&self) -> &str {
        self.enhanced_prompt.as_deref().unwrap_or(&self.prompt)
    }

    /// Append a history entry for `change`, then apply it
    pub fn apply_change(&mut self, change: FieldChange, at: DateTime<Utc>) {
        let field = change.field_name().to_string();
        let (old_value, new_value) = match change {
            FieldChange::Prompt(p) => {
                let old = std::mem::replace(&mut self.prompt, p.clone());
                (Some(old), Some(p))
            }
            FieldChange::EnhancedPrompt(p) => {
                let old = std::mem::replace(&mut self.enhanced_prompt, p.clone());
                (old, p)
            }
            FieldChange::ImagePath(p) => {
                let old = std::mem::replace(&mut self.image_path, p.clone());
                (old, p)
            }
            FieldChange::ModelPath(p) => {
                let old = std::mem::replace(&mut self.model_path, p.clone());
                (old, p)
            }
            FieldChange::Tags(tags) => {
                let old = join_tags(&self.metadata.tags);
                self.metadata.tags.clear();
                for tag in tags {
                    self.metadata.add_tag(tag);
                }
                (old, join_tags(&self.metadata.tags))
            }
        };

        self.metadata.edit_history.push(EditEntry {
            timestamp: at,
            field,
            old_value,
            new_value,
        });
    }
}

fn join_tags(tags: &[String]) -> Option<String> {
    if tags.is_empty() {
        None
    } else {
        Some(tags.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> GenerationRecord {
        GenerationRecord::from_new(RecordId(1), NewRecord::new("a glowing dragon"))
    }

    #[test]
    fn test_status_follows_paths() {
        let mut r = record();
        assert_eq!(r.status(), RecordStatus::Incomplete);
        r.image_path = Some("outputs/images/a.png".into());
        assert_eq!(r.status(), RecordStatus::ImageOnly);
        r.model_path = Some("outputs/models/a.glb".into());
        assert!(r.is_complete());

        // A model without an image is not complete
        r.image_path = None;
        assert_eq!(r.status(), RecordStatus::Incomplete);
    }

    #[test]
    fn test_apply_change_appends_history() {
        let mut r = record();
        let t = now_utc();
        r.apply_change(FieldChange::Prompt("a sleeping dragon".into()), t);
        r.apply_change(FieldChange::ImagePath(Some("x.png".into())), t);

        assert_eq!(r.prompt, "a sleeping dragon");
        assert_eq!(r.metadata.edit_history.len(), 2);
        let first = &r.metadata.edit_history[0];
        assert_eq!(first.field, "prompt");
        assert_eq!(first.old_value.as_deref(), Some("a glowing dragon"));
        assert_eq!(first.new_value.as_deref(), Some("a sleeping dragon"));
        let second = &r.metadata.edit_history[1];
        assert_eq!(second.old_value, None);
        assert_eq!(second.new_value.as_deref(), Some("x.png"));
    }

    #[test]
    fn test_tags_change_dedupes() {
        let mut r = record();
        r.metadata.add_tag("fantasy");
        r.apply_change(
            FieldChange::Tags(vec!["dragon".into(), " dragon ".into(), "".into()]),
            now_utc(),
        );
        assert_eq!(r.metadata.tags, vec!["dragon".to_string()]);
        let entry = r.metadata.edit_history.last().unwrap();
        assert_eq!(entry.old_value.as_deref(), Some("fantasy"));
        assert_eq!(entry.new_value.as_deref(), Some("dragon"));
    }

    #[test]
    fn test_metadata_extra_flattens() {
        let mut meta = RecordMetadata::with_tags(["sunset"]);
        meta.set_extra("image_hash", "sha256:00");
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["image_hash"], "sha256:00");
        assert_eq!(json["tags"][0], "sunset");

        let parsed: RecordMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, meta);
        assert_eq!(parsed.extra_str("image_hash"), Some("sha256:00"));
    }

    #[test]
    fn test_empty_prompt_rejected() {
        assert!(NewRecord::new("   ").validate().is_err());
        assert!(FieldChange::Prompt(String::new()).validate().is_err());
        assert!(FieldChange::ModelPath(None).validate().is_ok());
    }

    #[test]
    fn test_effective_prompt_prefers_enhanced() {
        let mut r = record();
        assert_eq!(r.effective_prompt(), "a glowing dragon");
        r.enhanced_prompt = Some("a glowing dragon at dusk, volumetric light".into());
        assert_eq!(r.effective_prompt(), "a glowing dragon at dusk, volumetric light");
    }
}
