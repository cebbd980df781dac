//! Protoform Pipeline - text to image to 3D model, one request at a time
//!
//! The [`Orchestrator`] threads a prompt through enhancement, image
//! generation, model generation and persistence, reporting each state it
//! passes through. Stored records can be resumed, regenerated or edited.

mod orchestrator;
mod request;
mod state;

pub use orchestrator::{Orchestrator, RunResult};
pub use protoform_gen::config::PipelineConfig;
pub use protoform_gen::{EnhanceFailurePolicy, PartialRecordPolicy};
pub use request::GenerationRequest;
pub use state::{PipelineFailure, PipelineOutcome, PipelineState, Stage};
