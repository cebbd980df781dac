//! The orchestrator
//!
//! Runs enhancement, image generation, model generation and persistence in
//! that order for one request. A failed stage ends the run; nothing after it
//! is attempted and nothing is retried here. What did succeed is kept or
//! thrown away according to the partial-record policy.

use crate::request::GenerationRequest;
use crate::state::{PipelineFailure, PipelineOutcome, PipelineState, Stage};
use protoform_core::{
    FieldChange, GenerationRecord, NewRecord, ProtoformError, RecordId, RecordMetadata, Result,
};
use protoform_gen::assets::{load_image, remove_asset};
use protoform_gen::config::PipelineConfig;
use protoform_gen::validate::{inspect_image, inspect_mesh};
use protoform_gen::{
    create_enhancer, AssetWriter, EnhanceFailurePolicy, GenerationClient, ImageBlob,
    PartialRecordPolicy, PromptEnhancer, ProtoformConfig, StoredAsset,
};
use protoform_store::GenerationStore;
use serde_json::{Map, Value};
use std::sync::Arc;

pub type RunResult = std::result::Result<PipelineOutcome, PipelineFailure>;

/// Metadata keys describing the last failed run of a record
const FAILURE_KEYS: [&str; 2] = ["failed_stage", "failure_reason"];
/// Metadata keys that describe the current model file
const MODEL_KEYS: [&str; 5] = [
    "model_hash",
    "model_provider",
    "mesh",
    "mesh_warning",
    "preview_path",
];

/// Composes the enhancer, the generation client and the store.
///
/// `Send + Sync`: share one orchestrator across threads by reference or
/// `Arc`. The store serializes writes; everything else is per-run.
pub struct Orchestrator {
    enhancer: Box<dyn PromptEnhancer>,
    client: GenerationClient,
    store: Arc<GenerationStore>,
    assets: AssetWriter,
    policy: PipelineConfig,
}

enum EnhanceStep {
    Run { context: Vec<String> },
    Edit { current: String, request: String },
    Keep,
}

enum ImageStep {
    Generate,
    Keep,
}

enum ModelStep {
    Generate,
    Keep,
    Clear,
}

/// What a run does, resolved up front
struct Job {
    prompt: String,
    tags: Vec<String>,
    existing: Option<GenerationRecord>,
    edit_request: Option<String>,
    enhance: EnhanceStep,
    image: ImageStep,
    model: ModelStep,
}

/// Outputs accumulated while the stages run
#[derive(Default)]
struct Produced {
    /// `Some(None)` when enhancement fell back to the raw prompt
    enhanced: Option<Option<String>>,
    image: Option<StoredAsset>,
    /// `Some(None)` when the model was cleared
    model: Option<Option<StoredAsset>>,
    preview: Option<StoredAsset>,
    extra: Map<String, Value>,
    enhance_fallback: bool,
}

impl Produced {
    fn files(&self) -> impl Iterator<Item = &StoredAsset> {
        self.image
            .iter()
            .chain(self.model.iter().flatten())
            .chain(self.preview.iter())
    }

    fn note(&mut self, key: &str, value: impl Into<Value>) {
        self.extra.insert(key.to_string(), value.into());
    }
}

/// State trail of one run
struct Run<'a> {
    request_id: String,
    states: Vec<PipelineState>,
    observer: &'a mut dyn FnMut(&PipelineState),
}

impl<'a> Run<'a> {
    fn start(request_id: String, observer: &'a mut dyn FnMut(&PipelineState)) -> Self {
        let mut run = Self {
            request_id,
            states: Vec::new(),
            observer,
        };
        run.enter(PipelineState::Start);
        run
    }

    fn enter(&mut self, state: PipelineState) {
        match &state {
            PipelineState::Start => {}
            PipelineState::Failed { .. } => {}
            _ => tracing::info!(state = %state, "Pipeline state"),
        }
        (self.observer)(&state);
        self.states.push(state);
    }
}

fn new_request_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..12].to_string()
}

impl Orchestrator {
    pub fn new(
        enhancer: Box<dyn PromptEnhancer>,
        client: GenerationClient,
        store: Arc<GenerationStore>,
        assets: AssetWriter,
    ) -> Self {
        Self {
            enhancer,
            client,
            store,
            assets,
            policy: PipelineConfig::default(),
        }
    }

    pub fn with_policy(mut self, policy: PipelineConfig) -> Self {
        self.policy = policy;
        self
    }

    /// Build the enhancer, providers, store and asset writer named in config
    pub fn from_config(config: &ProtoformConfig) -> Result<Self> {
        let enhancer = create_enhancer(config)?;
        let client = GenerationClient::from_config(config)?;
        let store = Arc::new(GenerationStore::open(&config.storage.database)?);
        let assets = AssetWriter::new(&config.storage.output_dir);
        Ok(Self::new(enhancer, client, store, assets).with_policy(config.pipeline.clone()))
    }

    pub fn store(&self) -> &Arc<GenerationStore> {
        &self.store
    }

    pub fn enhancer(&self) -> &dyn PromptEnhancer {
        self.enhancer.as_ref()
    }

    pub fn client(&self) -> &GenerationClient {
        &self.client
    }

    pub fn policy(&self) -> &PipelineConfig {
        &self.policy
    }

    /// Run every stage for a new prompt
    pub fn run(&self, request: &GenerationRequest) -> RunResult {
        self.run_observed(request, &mut |_| {})
    }

    /// `run`, reporting each state change to `observer` as it happens
    pub fn run_observed(
        &self,
        request: &GenerationRequest,
        observer: &mut dyn FnMut(&PipelineState),
    ) -> RunResult {
        let request_id = new_request_id();
        let span = tracing::info_span!("pipeline", request_id = %request_id);
        let _guard = span.enter();
        let run = Run::start(request_id, observer);

        if let Err(e) = request.validate() {
            return Err(reject(run, Stage::Enhancing, e, None));
        }

        let job = Job {
            prompt: request.prompt.trim().to_string(),
            tags: request.tags.clone(),
            existing: None,
            edit_request: None,
            enhance: EnhanceStep::Run {
                context: self.context_for(request),
            },
            image: ImageStep::Generate,
            model: ModelStep::Generate,
        };
        self.execute(run, job)
    }

    /// Run the missing stages of a stored record, reusing what it has
    pub fn resume(&self, id: RecordId) -> RunResult {
        self.resume_observed(id, &mut |_| {})
    }

    pub fn resume_observed(
        &self,
        id: RecordId,
        observer: &mut dyn FnMut(&PipelineState),
    ) -> RunResult {
        let request_id = new_request_id();
        let span = tracing::info_span!("pipeline", request_id = %request_id, record = %id);
        let _guard = span.enter();
        let mut run = Run::start(request_id, observer);

        let record = match self.store.get(id) {
            Ok(record) => record,
            Err(e) => return Err(reject(run, Stage::Loading, e, None)),
        };

        let needs_image = record.image_path.is_none();
        if !needs_image && record.model_path.is_some() {
            tracing::info!("Record is already complete");
            run.enter(PipelineState::Done);
            return Ok(PipelineOutcome {
                request_id: run.request_id,
                record,
                states: run.states,
                enhance_fallback: false,
            });
        }

        let enhance = if needs_image && record.enhanced_prompt.is_none() {
            EnhanceStep::Run {
                context: Vec::new(),
            }
        } else {
            EnhanceStep::Keep
        };
        let job = Job {
            prompt: record.prompt.clone(),
            tags: Vec::new(),
            existing: Some(record),
            edit_request: None,
            enhance,
            image: if needs_image {
                ImageStep::Generate
            } else {
                ImageStep::Keep
            },
            model: ModelStep::Generate,
        };
        self.execute(run, job)
    }

    /// Redo one stage of a stored record. Regenerating the image also
    /// regenerates the model built from it.
    pub fn regenerate(&self, id: RecordId, stage: Stage) -> RunResult {
        let request_id = new_request_id();
        let span = tracing::info_span!("pipeline", request_id = %request_id, record = %id);
        let _guard = span.enter();
        let mut noop = |_: &PipelineState| {};
        let run = Run::start(request_id, &mut noop);

        let image = match stage {
            Stage::ImageGenerating => ImageStep::Generate,
            Stage::ModelGenerating => ImageStep::Keep,
            other => {
                let e = ProtoformError::InvalidInput(format!("cannot regenerate the {} stage", other));
                return Err(reject(run, Stage::Loading, e, Some(id)));
            }
        };
        let record = match self.store.get(id) {
            Ok(record) => record,
            Err(e) => return Err(reject(run, Stage::Loading, e, None)),
        };

        let job = Job {
            prompt: record.prompt.clone(),
            tags: Vec::new(),
            existing: Some(record),
            edit_request: None,
            enhance: EnhanceStep::Keep,
            image,
            model: ModelStep::Generate,
        };
        self.execute(run, job)
    }

    /// Apply a change request to a stored record: rewrite its prompt with
    /// the enhancer, then regenerate the image and (unless `image_only`) the
    /// model. With `image_only` the old model is cleared, since it no longer
    /// matches the image.
    pub fn edit(&self, id: RecordId, edit_request: &str, image_only: bool) -> RunResult {
        let request_id = new_request_id();
        let span = tracing::info_span!("pipeline", request_id = %request_id, record = %id);
        let _guard = span.enter();
        let mut noop = |_: &PipelineState| {};
        let run = Run::start(request_id, &mut noop);

        let edit_request = edit_request.trim();
        if edit_request.is_empty() {
            let e = ProtoformError::InvalidInput("edit request must not be empty".to_string());
            return Err(reject(run, Stage::Enhancing, e, Some(id)));
        }
        let record = match self.store.get(id) {
            Ok(record) => record,
            Err(e) => return Err(reject(run, Stage::Loading, e, None)),
        };

        let job = Job {
            prompt: record.prompt.clone(),
            tags: Vec::new(),
            edit_request: Some(edit_request.to_string()),
            enhance: EnhanceStep::Edit {
                current: record.effective_prompt().to_string(),
                request: edit_request.to_string(),
            },
            existing: Some(record),
            image: ImageStep::Generate,
            model: if image_only {
                ModelStep::Clear
            } else {
                ModelStep::Generate
            },
        };
        self.execute(run, job)
    }

    /// Explicit context plus, when enabled, the closest stored prompt
    fn context_for(&self, request: &GenerationRequest) -> Vec<String> {
        let mut context: Vec<String> = request
            .context
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();

        if request.use_history_context || self.policy.history_context {
            match self.store.latest_context(&request.prompt) {
                Ok(Some(prior)) => {
                    tracing::debug!(id = %prior.id, "Using stored prompt as context");
                    context.push(prior.effective_prompt().to_string());
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "Could not look up prompt history"),
            }
        }
        context
    }

    fn execute(&self, mut run: Run<'_>, job: Job) -> RunResult {
        let mut produced = Produced::default();
        produced.note("request_id", run.request_id.clone());

        match &job.enhance {
            EnhanceStep::Keep => {}
            EnhanceStep::Run { context } => {
                run.enter(PipelineState::Enhancing);
                let result = self.enhancer.enhance(&job.prompt, context);
                if let Err(e) = self.settle_enhancement(result, None, &mut produced) {
                    return Err(self.abort(run, &job, produced, Stage::Enhancing, e));
                }
            }
            EnhanceStep::Edit { current, request } => {
                run.enter(PipelineState::Enhancing);
                let result = self.enhancer.enhance_edit(current, request);
                let fallback = Some(format!("{}, {}", current, request));
                if let Err(e) = self.settle_enhancement(result, fallback, &mut produced) {
                    return Err(self.abort(run, &job, produced, Stage::Enhancing, e));
                }
            }
        }

        let image_prompt = match &produced.enhanced {
            Some(Some(text)) => text.clone(),
            Some(None) => job.prompt.clone(),
            None => job
                .existing
                .as_ref()
                .map(|r| r.effective_prompt().to_string())
                .unwrap_or_else(|| job.prompt.clone()),
        };

        let mut image = None;
        if let ImageStep::Generate = job.image {
            run.enter(PipelineState::ImageGenerating);
            match self.generate_image(&image_prompt, &mut produced) {
                Ok(blob) => image = Some(blob),
                Err(e) => return Err(self.abort(run, &job, produced, Stage::ImageGenerating, e)),
            }
        }

        match job.model {
            ModelStep::Keep => {}
            ModelStep::Clear => produced.model = Some(None),
            ModelStep::Generate => {
                run.enter(PipelineState::ModelGenerating);
                let result = match image {
                    Some(blob) => Ok(blob),
                    None => stored_image(job.existing.as_ref()),
                }
                .and_then(|blob| self.generate_model(&blob, &mut produced));
                if let Err(e) = result {
                    return Err(self.abort(run, &job, produced, Stage::ModelGenerating, e));
                }
            }
        }

        run.enter(PipelineState::Persisting);
        let record = match self.save(&job, &produced, None) {
            Ok(record) => record,
            Err(e) => return Err(self.abort(run, &job, produced, Stage::Persisting, e)),
        };

        run.enter(PipelineState::Done);
        tracing::info!(id = %record.id, status = %record.status(), "Pipeline finished");
        Ok(PipelineOutcome {
            request_id: run.request_id,
            record,
            states: run.states,
            enhance_fallback: produced.enhance_fallback,
        })
    }

    /// Apply the enhance-failure policy to an enhancer result
    fn settle_enhancement(
        &self,
        result: Result<String>,
        fallback: Option<String>,
        produced: &mut Produced,
    ) -> Result<()> {
        match result {
            Ok(text) => {
                produced.enhanced = Some(Some(text));
                produced.note("enhancer", self.enhancer.name());
                Ok(())
            }
            Err(e) => match self.policy.enhance_failure {
                EnhanceFailurePolicy::Fail => Err(e),
                EnhanceFailurePolicy::Fallback => {
                    tracing::warn!(error = %e, "Prompt enhancement failed, continuing without it");
                    produced.enhanced = Some(fallback);
                    produced.enhance_fallback = true;
                    produced.note("enhance_error", e.to_string());
                    Ok(())
                }
            },
        }
    }

    fn generate_image(&self, prompt: &str, produced: &mut Produced) -> Result<ImageBlob> {
        let blob = self.client.text_to_image(prompt)?;
        let stored = self.assets.save_image(&blob)?;
        produced.note("image_hash", stored.hash.to_prefixed_hex());
        produced.note("image_provider", self.client.image_provider_name());
        produced.image = Some(stored);

        match inspect_image(&blob) {
            Ok(info) => produced.note("image_info", serde_json::to_value(&info)?),
            Err(e) => tracing::warn!(error = %e, "Could not read image dimensions"),
        }
        Ok(blob)
    }

    fn generate_model(&self, image: &ImageBlob, produced: &mut Produced) -> Result<()> {
        let mesh = self.client.image_to_model(image)?;
        let stored = self.assets.save_model(&mesh)?;
        produced.note("model_hash", stored.hash.to_prefixed_hex());
        produced.note("model_provider", self.client.model_provider_name());
        produced.model = Some(Some(stored));

        match inspect_mesh(&mesh) {
            Ok(report) => {
                tracing::debug!(summary = %report.summary(), "Model parsed");
                produced.note("mesh", serde_json::to_value(&report)?);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Model did not parse as glTF, keeping it as an opaque file");
                produced.note("mesh_warning", e.to_string());
            }
        }

        if let Some(video) = &mesh.preview_video {
            match self.assets.save_preview(video) {
                Ok(preview) => {
                    produced.note("preview_path", preview.path_string());
                    produced.preview = Some(preview);
                }
                Err(e) => tracing::warn!(error = %e, "Could not save preview video"),
            }
        }
        Ok(())
    }

    /// Write the run's outputs: a new record, or field changes plus
    /// metadata on the existing one
    fn save(
        &self,
        job: &Job,
        produced: &Produced,
        failure: Option<(Stage, &ProtoformError)>,
    ) -> Result<GenerationRecord> {
        let mut extra = produced.extra.clone();
        if let Some((stage, error)) = failure {
            extra.insert("failed_stage".into(), stage.as_str().into());
            extra.insert("failure_reason".into(), error.to_string().into());
        }

        let Some(existing) = &job.existing else {
            let mut new = NewRecord::new(job.prompt.clone());
            new.enhanced_prompt = produced.enhanced.clone().flatten();
            new.image_path = produced.image.as_ref().map(StoredAsset::path_string);
            new.model_path = produced
                .model
                .as_ref()
                .and_then(|m| m.as_ref())
                .map(StoredAsset::path_string);
            new.metadata = RecordMetadata::with_tags(job.tags.iter().cloned());
            new.metadata.extra = extra;
            let id = self.store.create(&new)?;
            return Ok(GenerationRecord::from_new(id, new));
        };

        let mut changes = Vec::new();
        if let Some(enhanced) = &produced.enhanced {
            changes.push(FieldChange::EnhancedPrompt(enhanced.clone()));
        }
        if let Some(image) = &produced.image {
            changes.push(FieldChange::ImagePath(Some(image.path_string())));
        }
        if let Some(model) = &produced.model {
            changes.push(FieldChange::ModelPath(model.as_ref().map(StoredAsset::path_string)));
        }

        let succeeded = failure.is_none();
        let model_cleared = matches!(produced.model, Some(None));
        let edit_request = job.edit_request.clone();
        self.store.update_with_metadata(existing.id, &changes, move |meta| {
            if succeeded {
                for key in FAILURE_KEYS {
                    meta.remove(key);
                }
            }
            if model_cleared {
                for key in MODEL_KEYS {
                    meta.remove(key);
                }
            }
            if let Some(request) = edit_request {
                let entry = meta
                    .entry("edit_requests")
                    .or_insert_with(|| Value::Array(Vec::new()));
                match entry {
                    Value::Array(items) => items.push(Value::String(request)),
                    other => *other = Value::Array(vec![Value::String(request)]),
                }
            }
            meta.extend(extra);
        })
    }

    /// End a run at `stage`, keeping or discarding partial outputs
    fn abort(
        &self,
        mut run: Run<'_>,
        job: &Job,
        mut produced: Produced,
        stage: Stage,
        error: ProtoformError,
    ) -> PipelineFailure {
        tracing::error!(stage = %stage, error = %error, "Pipeline stage failed");
        run.enter(PipelineState::Failed {
            stage,
            reason: error.to_string(),
        });

        let existing_id = job.existing.as_ref().map(|r| r.id);
        let (record_id, persist_error) = if stage == Stage::Persisting {
            discard_files(&produced);
            (existing_id, None)
        } else {
            match self.policy.partial_records {
                PartialRecordPolicy::Persist => {
                    // A new image invalidates the model built from the old one
                    let had_model = job.existing.as_ref().is_some_and(|r| r.model_path.is_some());
                    if had_model && produced.image.is_some() && produced.model.is_none() {
                        produced.model = Some(None);
                    }
                    match self.save(job, &produced, Some((stage, &error))) {
                        Ok(record) => {
                            tracing::info!(id = %record.id, status = %record.status(), "Saved partial record");
                            (Some(record.id), None)
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Could not save partial record");
                            discard_files(&produced);
                            (existing_id, Some(e))
                        }
                    }
                }
                PartialRecordPolicy::Discard => {
                    discard_files(&produced);
                    (existing_id, None)
                }
            }
        };

        PipelineFailure {
            request_id: run.request_id,
            stage,
            error,
            record_id,
            persist_error,
            states: run.states,
        }
    }
}

/// End a run before any work was done
fn reject(
    mut run: Run<'_>,
    stage: Stage,
    error: ProtoformError,
    record_id: Option<RecordId>,
) -> PipelineFailure {
    tracing::warn!(stage = %stage, error = %error, "Request rejected");
    run.enter(PipelineState::Failed {
        stage,
        reason: error.to_string(),
    });
    PipelineFailure {
        request_id: run.request_id,
        stage,
        error,
        record_id,
        persist_error: None,
        states: run.states,
    }
}

/// Delete files a run wrote but no record will point at
fn discard_files(produced: &Produced) {
    for file in produced.files() {
        if let Err(e) = remove_asset(&file.path) {
            tracing::warn!(path = %file.path.display(), error = %e, "Could not remove discarded asset");
        }
    }
}

/// The image a stored record's model should be built from
fn stored_image(existing: Option<&GenerationRecord>) -> Result<ImageBlob> {
    let path = existing
        .and_then(|r| r.image_path.as_deref())
        .ok_or_else(|| {
            ProtoformError::InvalidInput("record has no image to build a model from".to_string())
        })?;
    load_image(path)
}
