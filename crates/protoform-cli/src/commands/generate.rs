//! Pipeline commands: generate, edit, resume, regenerate

use super::print_record;
use anyhow::Result;
use protoform_core::RecordId;
use protoform_gen::ProtoformConfig;
use protoform_pipeline::{GenerationRequest, Orchestrator, PipelineState, RunResult, Stage};

pub struct GenerateArgs {
    pub prompt: String,
    pub context: Vec<String>,
    pub tags: Vec<String>,
    pub history_context: bool,
}

pub fn run_generate(config: &ProtoformConfig, args: GenerateArgs) -> Result<()> {
    let orchestrator = Orchestrator::from_config(config)?;
    let request = GenerationRequest::new(args.prompt)
        .with_context(args.context)
        .with_tags(args.tags)
        .with_history_context(args.history_context);

    println!(
        "Generating '{}' (image: {}, model: {})...",
        request.prompt.trim(),
        orchestrator.client().image_provider_name(),
        orchestrator.client().model_provider_name()
    );
    let result = orchestrator.run_observed(&request, &mut print_state);
    report(result)
}

pub fn run_edit(config: &ProtoformConfig, id: RecordId, request: &str, image_only: bool) -> Result<()> {
    let orchestrator = Orchestrator::from_config(config)?;
    if image_only {
        println!("Editing record #{} (image only): {}", id, request);
    } else {
        println!("Editing record #{}: {}", id, request);
    }
    report(orchestrator.edit(id, request, image_only))
}

pub fn run_resume(config: &ProtoformConfig, id: RecordId) -> Result<()> {
    let orchestrator = Orchestrator::from_config(config)?;
    println!("Resuming record #{}...", id);
    report(orchestrator.resume_observed(id, &mut print_state))
}

pub fn run_regenerate(config: &ProtoformConfig, id: RecordId, stage: Stage) -> Result<()> {
    let orchestrator = Orchestrator::from_config(config)?;
    println!("Regenerating {} for record #{}...", stage, id);
    report(orchestrator.regenerate(id, stage))
}

fn print_state(state: &PipelineState) {
    match state {
        PipelineState::Start | PipelineState::Done | PipelineState::Failed { .. } => {}
        other => println!("  {}...", other),
    }
}

fn report(result: RunResult) -> Result<()> {
    match result {
        Ok(outcome) => {
            if outcome.enhance_fallback {
                println!("  Prompt enhancement was unavailable; used the prompt as written.");
            }
            println!();
            print_record(&outcome.record);
            if let Some(mesh) = outcome.record.metadata.extra.get("mesh") {
                println!("  Mesh: {}", mesh);
            }
            if let Some(warning) = outcome.record.metadata.extra_str("mesh_warning") {
                println!("  Mesh warning: {}", warning);
            }
            Ok(())
        }
        Err(failure) => {
            if let Some(id) = failure.record_id {
                if failure.persist_error.is_none() {
                    eprintln!("  Partial results are in record #{}; run `protoform resume {}` to finish.", id, id);
                }
            }
            if let Some(e) = &failure.persist_error {
                eprintln!("  Saving partial results failed too: {}", e);
            }
            if failure.is_retryable() {
                eprintln!("  The service looks temporarily unavailable; try again shortly.");
            }
            Err(failure.into())
        }
    }
}
