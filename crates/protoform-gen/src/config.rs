//! Layered configuration system
//!
//! Config is loaded with three layers of precedence (highest wins):
//! 1. Environment variables: `PROTOFORM_{PROVIDER}_API_KEY`,
//!    `PROTOFORM_OLLAMA_URL`, `PROTOFORM_DATABASE`
//! 2. Project-local: `.protoform/config.toml`
//! 3. Global: `~/.protoform/config.toml`

use crate::http::RetryPolicy;
use protoform_core::{ProtoformError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 2000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Provider names that accept a `PROTOFORM_{NAME}_API_KEY` override
const KEYED_PROVIDERS: [&str; 3] = ["fabric", "flux", "meshy"];

/// Provider-specific configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-capability endpoint URLs (`text_to_image`, `image_to_model`)
    #[serde(default)]
    pub endpoints: HashMap<String, String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: None,
            enabled: true,
            endpoints: HashMap::new(),
            max_retries: None,
            retry_delay_ms: None,
            timeout_secs: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Language-model endpoint used for prompt enhancement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancerConfig {
    #[serde(default = "default_enhancer_provider")]
    pub provider: String,
    #[serde(default = "default_enhancer_url")]
    pub url: String,
    #[serde(default = "default_enhancer_model")]
    pub model: String,
    #[serde(default = "default_enhancer_timeout")]
    pub timeout_secs: u64,
}

impl Default for EnhancerConfig {
    fn default() -> Self {
        Self {
            provider: default_enhancer_provider(),
            url: default_enhancer_url(),
            model: default_enhancer_model(),
            timeout_secs: default_enhancer_timeout(),
        }
    }
}

fn default_enhancer_provider() -> String {
    "ollama".to_string()
}
fn default_enhancer_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_enhancer_model() -> String {
    "llama3:latest".to_string()
}
fn default_enhancer_timeout() -> u64 {
    60
}

/// Which providers serve each pipeline capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_image_provider")]
    pub image_provider: String,
    #[serde(default = "default_model_provider")]
    pub model_provider: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            image_provider: default_image_provider(),
            model_provider: default_model_provider(),
        }
    }
}

fn default_image_provider() -> String {
    "fabric".to_string()
}
fn default_model_provider() -> String {
    "fabric".to_string()
}

/// Where records and asset files live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database")]
    pub database: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            output_dir: default_output_dir(),
        }
    }
}

fn default_database() -> PathBuf {
    PathBuf::from("outputs/generations.db")
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("outputs")
}

/// What to do when prompt enhancement fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnhanceFailurePolicy {
    /// Continue with the raw prompt
    #[default]
    Fallback,
    /// Stop the run at the enhancing stage
    Fail,
}

/// What to do with the outputs of a run that fails part-way
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartialRecordPolicy {
    #[default]
    Persist,
    Discard,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub enhance_failure: EnhanceFailurePolicy,
    #[serde(default)]
    pub partial_records: PartialRecordPolicy,
    /// Feed the closest stored prompt into enhancement
    #[serde(default)]
    pub history_context: bool,
}

/// Resolved configuration, file layers merged and environment applied
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtoformConfig {
    #[serde(default)]
    pub enhancer: EnhancerConfig,
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl ProtoformConfig {
    /// Load config with layered precedence: global < project < env vars
    pub fn load() -> Result<Self> {
        let global = Self::global_config_path();
        let project = PathBuf::from(".protoform/config.toml");
        let mut config = Self::load_layers(global.as_deref(), Some(&project))?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load config from a specific file path only, then apply the environment
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let mut config = Self::load_file(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Merge the file layers that exist, lowest precedence first.
    ///
    /// Layers are merged key by key before deserializing, so a higher layer
    /// only overrides the keys it actually sets (including setting one back
    /// to its default).
    pub fn load_layers(global: Option<&Path>, project: Option<&Path>) -> Result<Self> {
        let mut merged = toml::Table::new();
        for path in [global, project].into_iter().flatten() {
            if path.exists() {
                tracing::debug!(path = %path.display(), "Loading config layer");
                merge_tables(&mut merged, Self::read_table(path)?);
            }
        }
        toml::Value::Table(merged)
            .try_into()
            .map_err(|e| ProtoformError::Config(format!("Invalid config: {}", e)))
    }

    pub fn api_key(&self, provider_name: &str) -> Option<&str> {
        self.providers
            .get(provider_name)
            .and_then(|p| p.api_key.as_deref())
    }

    pub fn api_url(&self, provider_name: &str) -> Option<&str> {
        self.providers
            .get(provider_name)
            .and_then(|p| p.api_url.as_deref())
    }

    /// Endpoint URL for one capability of a provider
    pub fn endpoint(&self, provider_name: &str, capability: &str) -> Option<&str> {
        self.providers
            .get(provider_name)
            .and_then(|p| p.endpoints.get(capability))
            .map(|s| s.as_str())
    }

    /// Providers are enabled unless a config layer says otherwise
    pub fn is_enabled(&self, provider_name: &str) -> bool {
        self.providers
            .get(provider_name)
            .map(|p| p.enabled)
            .unwrap_or(true)
    }

    /// Transport retry settings for a provider
    pub fn retry_policy(&self, provider_name: &str) -> RetryPolicy {
        let provider = self.providers.get(provider_name);
        RetryPolicy::new(
            provider
                .and_then(|p| p.max_retries)
                .unwrap_or(DEFAULT_MAX_RETRIES),
            Duration::from_millis(
                provider
                    .and_then(|p| p.retry_delay_ms)
                    .unwrap_or(DEFAULT_RETRY_DELAY_MS),
            ),
        )
    }

    pub fn timeout(&self, provider_name: &str) -> Duration {
        Duration::from_secs(
            self.providers
                .get(provider_name)
                .and_then(|p| p.timeout_secs)
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        )
    }

    fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".protoform").join("config.toml"))
    }

    fn load_file(path: &Path) -> Result<Self> {
        toml::Value::Table(Self::read_table(path)?)
            .try_into()
            .map_err(|e| {
                ProtoformError::Config(format!("Invalid config {}: {}", path.display(), e))
            })
    }

    fn read_table(path: &Path) -> Result<toml::Table> {
        let content = std::fs::read_to_string(path)?;
        content.parse::<toml::Table>().map_err(|e| {
            ProtoformError::Config(format!("Failed to parse config {}: {}", path.display(), e))
        })
    }

    /// Apply environment overrides, read through `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for name in KEYED_PROVIDERS {
            let env_key = format!("PROTOFORM_{}_API_KEY", name.to_uppercase());
            if let Some(key) = lookup(&env_key) {
                let entry = self.providers.entry(name.to_string()).or_default();
                entry.api_key = Some(key);
            }
        }
        if let Some(url) = lookup("PROTOFORM_OLLAMA_URL") {
            self.enhancer.url = url;
        }
        if let Some(db) = lookup("PROTOFORM_DATABASE") {
            self.storage.database = PathBuf::from(db);
        }
    }
}

/// Deep-merge `overlay` into `base`: tables merge recursively, any other
/// value present in `overlay` replaces the one in `base`
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        if let toml::Value::Table(incoming) = value {
            if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
                merge_tables(existing, incoming);
                continue;
            }
            base.insert(key, toml::Value::Table(incoming));
        } else {
            base.insert(key, value);
        }
    }
}
