//! CLI command implementations

pub mod generate;
pub mod library;
pub mod providers;
pub mod viewer;

use anyhow::{Context, Result};
use protoform_core::GenerationRecord;
use protoform_gen::assets::remove_asset;
use protoform_gen::ProtoformConfig;
use protoform_store::GenerationStore;
use std::path::Path;

/// `--config` replaces the global and project layers; the environment
/// still applies on top
pub fn load_config(path: Option<&Path>) -> Result<ProtoformConfig> {
    match path {
        Some(path) => ProtoformConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(ProtoformConfig::load()?),
    }
}

pub fn open_store(config: &ProtoformConfig) -> Result<GenerationStore> {
    let path = &config.storage.database;
    GenerationStore::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))
}

/// One-line summary for lists
pub fn print_record_line(record: &GenerationRecord) {
    println!(
        "  #{:<5} {:<11} {}  {}",
        record.id.to_string(),
        record.status().to_string(),
        record
            .created_at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M"),
        truncate(&record.prompt, 60)
    );
}

/// Full record, for `show` and after a run
pub fn print_record(record: &GenerationRecord) {
    println!("Record #{}", record.id);
    println!("  Status: {}", record.status());
    println!("  Prompt: {}", record.prompt);
    if let Some(enhanced) = &record.enhanced_prompt {
        println!("  Enhanced: {}", enhanced);
    }
    println!("  Image: {}", record.image_path.as_deref().unwrap_or("-"));
    println!("  Model: {}", record.model_path.as_deref().unwrap_or("-"));
    if let Some(preview) = record.metadata.extra_str("preview_path") {
        println!("  Preview: {}", preview);
    }
    if !record.metadata.tags.is_empty() {
        println!("  Tags: {}", record.metadata.tags.join(", "));
    }
    println!(
        "  Created: {}",
        record.created_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(stage) = record.metadata.extra_str("failed_stage") {
        let reason = record.metadata.extra_str("failure_reason").unwrap_or("unknown");
        println!("  Last failure: {} ({})", stage, reason);
    }
}

pub fn truncate(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", cut.trim_end())
}

/// Remove a record's files from disk. Returns how many were deleted.
pub fn purge_files(record: &GenerationRecord) -> usize {
    let paths = [
        record.image_path.as_deref(),
        record.model_path.as_deref(),
        record.metadata.extra_str("preview_path"),
    ];

    let mut removed = 0;
    for path in paths.into_iter().flatten() {
        match remove_asset(path) {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(e) => tracing::warn!(path, error = %e, "Could not delete file"),
        }
    }
    removed
}
