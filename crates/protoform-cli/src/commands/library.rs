//! Browsing and maintaining stored generations

use super::{open_store, print_record, print_record_line, purge_files};
use anyhow::Result;
use protoform_core::{FieldChange, GenerationRecord, RecordId};
use protoform_gen::ProtoformConfig;

pub struct UpdateArgs {
    pub prompt: Option<String>,
    pub enhanced_prompt: Option<String>,
    pub tags: Option<String>,
}

pub fn run_show(config: &ProtoformConfig, id: RecordId, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let record = store.get(id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    print_record(&record);
    let history = &record.metadata.edit_history;
    if !history.is_empty() {
        println!("  History:");
        for entry in history {
            println!(
                "    {}  {}: {} -> {}",
                entry.timestamp.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
                entry.field,
                entry.old_value.as_deref().unwrap_or("-"),
                entry.new_value.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}

pub fn run_history(config: &ProtoformConfig, limit: usize, offset: usize) -> Result<()> {
    let store = open_store(config)?;
    let records = store.list_all(limit, offset)?;
    if records.is_empty() {
        println!("No generations found.");
        return Ok(());
    }
    print_list(&records);
    Ok(())
}

pub fn run_search(config: &ProtoformConfig, query: &str) -> Result<()> {
    let store = open_store(config)?;
    let records = store.search(query)?;
    if records.is_empty() {
        println!("No generations match '{}'.", query);
        return Ok(());
    }
    print_list(&records);
    Ok(())
}

pub fn run_update(config: &ProtoformConfig, id: RecordId, args: UpdateArgs) -> Result<()> {
    let changes = build_changes(args);
    if changes.is_empty() {
        anyhow::bail!("Nothing to update; pass --prompt, --enhanced-prompt or --tags");
    }

    let store = open_store(config)?;
    let record = store.update(id, &changes)?;
    println!("Record #{} updated ({} change(s)).", record.id, changes.len());
    Ok(())
}

pub fn run_delete(config: &ProtoformConfig, id: RecordId, purge: bool) -> Result<()> {
    let store = open_store(config)?;
    let record = store.delete(id)?;
    println!("Record #{} deleted.", record.id);
    if purge {
        println!("  Removed {} file(s).", purge_files(&record));
    }
    Ok(())
}

pub fn run_clear(config: &ProtoformConfig, yes: bool, purge: bool) -> Result<()> {
    let store = open_store(config)?;
    if !yes {
        let total = store.stats()?.total;
        anyhow::bail!("This deletes all {} record(s); re-run with --yes to confirm", total);
    }

    let removed = store.clear()?;
    println!("Deleted {} record(s).", removed.len());
    if purge {
        let files: usize = removed.iter().map(purge_files).sum();
        println!("  Removed {} file(s).", files);
    }
    Ok(())
}

pub fn run_info(config: &ProtoformConfig) -> Result<()> {
    let store = open_store(config)?;
    let stats = store.stats()?;
    println!("Database: {}", config.storage.database.display());
    println!("Output directory: {}", config.storage.output_dir.display());
    println!("  Total: {}", stats.total);
    println!("  Complete: {}", stats.complete);
    println!("  Image only: {}", stats.image_only);
    println!("  Incomplete: {}", stats.incomplete);
    Ok(())
}

fn print_list(records: &[GenerationRecord]) {
    println!("{} generation(s):\n", records.len());
    for record in records {
        print_record_line(record);
    }
}

/// Field changes from the update flags. An empty `--enhanced-prompt`
/// clears the enhanced prompt.
fn build_changes(args: UpdateArgs) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    if let Some(prompt) = args.prompt {
        changes.push(FieldChange::Prompt(prompt));
    }
    if let Some(enhanced) = args.enhanced_prompt {
        let enhanced = Some(enhanced).filter(|e| !e.trim().is_empty());
        changes.push(FieldChange::EnhancedPrompt(enhanced));
    }
    if let Some(tags) = args.tags {
        let tags = tags
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        changes.push(FieldChange::Tags(tags));
    }
    changes
}
