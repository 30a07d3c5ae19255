//! Edit orchestration
//!
//! Runs one edit request through a fixed, linear sequence of stages:
//!
//! ```text
//! ACQUIRE_SOURCE -> RESIZE_TO_EDIT_RES -> RESIZE_TO_INFERENCE_RES -> INFER
//!   -> SYNTHESIZE_MASK -> ASSEMBLE_REQUEST -> SUBMIT -> EXTRACT_RESULT
//! ```
//!
//! Both resizes start from the decoded original, so the inference and edit
//! resolutions never compound resampling error. Any stage failure aborts the
//! request and surfaces the originating error unchanged. Intermediate
//! artifacts live in a [`ScratchScope`] that is removed on every exit path.

use crate::{
    config::EditConfig,
    edit_service::{EditService, HttpEditService, RetryingEditService},
    error::{EditError, Result},
    inference::SegmentationAdapter,
    mask::MaskSynthesizer,
    resize::CanvasResizer,
    scratch::{FsScratchStorage, ScratchHandle, ScratchScope, ScratchStorage},
    services::progress::{
        EditStage, EditTimings, NoOpProgressReporter, ProgressReporter, ProgressTracker,
    },
    source::{ImageInput, ImageSource},
    types::{encode_png, CanvasParams, EditRequest, EditResult, Mask},
};
use std::sync::Arc;
use tracing::{error, info, info_span, Instrument};

/// Source and mask ready for submission
///
/// Dropping a prepared edit removes its scratch artifacts.
pub struct PreparedEdit {
    /// Identifier shared by this request's logs and scratch artifacts
    pub request_id: String,
    /// Pixel dimensions of the decoded original
    pub source_dimensions: (u32, u32),
    /// Pixel dimensions of the source at edit resolution
    pub edit_dimensions: (u32, u32),
    /// Mask at edit resolution, with the raw labels it came from
    pub mask: Mask,
    scope: ScratchScope,
    image_handle: ScratchHandle,
    mask_handle: ScratchHandle,
}

impl std::fmt::Debug for PreparedEdit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedEdit")
            .field("request_id", &self.request_id)
            .field("source_dimensions", &self.source_dimensions)
            .field("edit_dimensions", &self.edit_dimensions)
            .field("mask", &self.mask.dimensions())
            .finish_non_exhaustive()
    }
}

impl PreparedEdit {
    /// PNG bytes of the source at edit resolution
    ///
    /// # Errors
    /// - Scratch storage read failure
    pub fn image_png(&self) -> Result<Vec<u8>> {
        self.scope.get(&self.image_handle)
    }

    /// PNG bytes of the synthesized mask
    ///
    /// # Errors
    /// - Scratch storage read failure
    pub fn mask_png(&self) -> Result<Vec<u8>> {
        self.scope.get(&self.mask_handle)
    }
}

/// Successful edit request
#[derive(Debug, Clone)]
pub struct EditOutcome {
    /// First generated image, the one this pipeline consumes
    pub url: String,
    pub request_id: String,
    pub source_dimensions: (u32, u32),
    /// Mask that was submitted
    pub mask: Mask,
    /// Full service response
    pub result: EditResult,
    pub timings: EditTimings,
}

impl EditOutcome {
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Runs edit requests against injected collaborators
pub struct EditOrchestrator {
    config: EditConfig,
    adapter: Arc<SegmentationAdapter>,
    edit_service: Arc<dyn EditService>,
    scratch: Arc<dyn ScratchStorage>,
    http: reqwest::Client,
    reporter: Arc<dyn ProgressReporter>,
}

impl EditOrchestrator {
    /// Create an orchestrator from explicit collaborators
    ///
    /// # Errors
    /// - Any rule checked by [`EditConfig::validate`]
    pub fn new(
        config: EditConfig,
        adapter: Arc<SegmentationAdapter>,
        edit_service: Arc<dyn EditService>,
        scratch: Arc<dyn ScratchStorage>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            adapter,
            edit_service,
            scratch,
            http: reqwest::Client::new(),
            reporter: Arc::new(NoOpProgressReporter),
        })
    }

    /// Wire the default collaborators for `config`
    ///
    /// Uses the process-wide segmentation adapter, the HTTP edit service
    /// wrapped in the configured retry policy, and file scratch storage.
    ///
    /// # Errors
    /// - `InvalidConfig` when no credential is set or the backend is unavailable
    /// - `Io` when the scratch directory cannot be created
    pub fn from_config(config: EditConfig) -> Result<Self> {
        let http = reqwest::Client::new();
        let adapter = SegmentationAdapter::shared(&config)?;
        let service = RetryingEditService::new(
            HttpEditService::from_config(&config, http.clone())?,
            config.retry.clone(),
        );
        let scratch = Arc::new(FsScratchStorage::new(config.scratch_dir.clone())?);
        Ok(Self::new(config, adapter, Arc::new(service), scratch)?.with_http_client(http))
    }

    /// Client used to fetch URL sources
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn with_progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    #[must_use]
    pub fn config(&self) -> &EditConfig {
        &self.config
    }

    #[must_use]
    pub fn adapter(&self) -> &Arc<SegmentationAdapter> {
        &self.adapter
    }

    /// Run the whole pipeline and return the first generated image
    ///
    /// # Errors
    /// - `InvalidConfig` for a blank prompt, before anything else runs
    /// - Whatever the failing stage produced, unchanged
    pub async fn request_edit(&self, source: ImageSource, prompt: &str) -> Result<EditOutcome> {
        validate_prompt(prompt)?;
        let mut tracker = ProgressTracker::new(self.reporter.as_ref());
        let prepared = self.prepare_tracked(source, &mut tracker).await?;
        let span = info_span!("edit_request", request_id = %prepared.request_id);
        self.submit_tracked(prepared, prompt, tracker)
            .instrument(span)
            .await
    }

    /// Run the pipeline on a loosely specified input
    ///
    /// # Errors
    /// - `InvalidConfig` for a blank prompt
    /// - `NoInputProvided` when the input names no source; nothing else runs
    /// - Whatever the failing stage produced, unchanged
    pub async fn request_edit_from(&self, input: ImageInput, prompt: &str) -> Result<EditOutcome> {
        validate_prompt(prompt)?;
        self.request_edit(input.into_source()?, prompt).await
    }

    /// Run every stage up to, not including, ASSEMBLE_REQUEST
    ///
    /// # Errors
    /// - `Network`, `RemoteService` or `Io` while acquiring
    /// - `Decode` / `InvalidDimension` while resizing
    /// - `ModelLoad` / `Inference` while classifying
    /// - `EmptyGrid` while synthesizing the mask
    pub async fn prepare(&self, source: ImageSource) -> Result<PreparedEdit> {
        let mut tracker = ProgressTracker::new(self.reporter.as_ref());
        self.prepare_tracked(source, &mut tracker).await
    }

    /// Run ASSEMBLE_REQUEST through EXTRACT_RESULT on a prepared edit
    ///
    /// # Errors
    /// - `InvalidConfig` for a blank prompt
    /// - `DimensionMismatch` when source and mask differ in size; nothing is submitted
    /// - `Timeout` when SUBMIT exceeds the configured deadline
    /// - `RemoteService` / `Network` from the edit service
    pub async fn submit_prepared(&self, prepared: PreparedEdit, prompt: &str) -> Result<EditOutcome> {
        validate_prompt(prompt)?;
        let tracker = ProgressTracker::new(self.reporter.as_ref());
        let span = info_span!("edit_request", request_id = %prepared.request_id);
        self.submit_tracked(prepared, prompt, tracker)
            .instrument(span)
            .await
    }

    async fn prepare_tracked(
        &self,
        source: ImageSource,
        tracker: &mut ProgressTracker<'_>,
    ) -> Result<PreparedEdit> {
        let mut scope = ScratchScope::new(Arc::clone(&self.scratch));
        let request_id = scope.prefix().to_string();
        let span = info_span!("edit_request", request_id = %request_id);

        async move {
            info!(source = %source.describe(), "Starting edit request");

            tracker.enter(EditStage::AcquireSource);
            let bytes = source
                .acquire(&self.http)
                .await
                .map_err(|e| stage_failed(tracker, e))?;

            tracker.enter(EditStage::ResizeToEditRes);
            let original = CanvasResizer::decode(&bytes).map_err(|e| stage_failed(tracker, e))?;
            let source_dimensions = (original.width(), original.height());
            let edit_params =
                CanvasParams::new(self.config.edit_size).with_enlarge(self.config.enlarge);
            let edit_image = CanvasResizer::resize_image(&original, &edit_params)
                .map_err(|e| stage_failed(tracker, e))?;
            let edit_dimensions = edit_image.dimensions();
            let image_handle = encode_png(&edit_image)
                .and_then(|png| scope.put("image.png", &png))
                .map_err(|e| stage_failed(tracker, e))?;

            tracker.enter(EditStage::ResizeToInferenceRes);
            let inference_params =
                CanvasParams::mirroring(&edit_params, self.adapter.input_size());
            let inference_image = CanvasResizer::resize_image(&original, &inference_params)
                .map(|canvas| CanvasResizer::to_rgb(&canvas))
                .map_err(|e| stage_failed(tracker, e))?;
            drop(original);

            tracker.enter(EditStage::Infer);
            let grid = self
                .adapter
                .classify(&inference_image)
                .await
                .map_err(|e| stage_failed(tracker, e))?;

            tracker.enter(EditStage::SynthesizeMask);
            let mut mask =
                MaskSynthesizer::synthesize(&grid, edit_dimensions.0, edit_dimensions.1)
                    .map_err(|e| stage_failed(tracker, e))?;
            MaskSynthesizer::preserve_transparent(&mut mask, &edit_image)
                .map_err(|e| stage_failed(tracker, e))?;
            let mask_handle = mask
                .to_png()
                .and_then(|png| scope.put("mask.png", &png))
                .map_err(|e| stage_failed(tracker, e))?;

            info!(
                source = ?source_dimensions,
                editable_pixels = mask.editable_pixels(),
                "Mask ready"
            );

            Ok(PreparedEdit {
                request_id,
                source_dimensions,
                edit_dimensions,
                mask,
                scope,
                image_handle,
                mask_handle,
            })
        }
        .instrument(span)
        .await
    }

    async fn submit_tracked(
        &self,
        prepared: PreparedEdit,
        prompt: &str,
        mut tracker: ProgressTracker<'_>,
    ) -> Result<EditOutcome> {
        tracker.enter(EditStage::AssembleRequest);
        let request = self
            .assemble(&prepared, prompt)
            .map_err(|e| stage_failed(&tracker, e))?;

        tracker.enter(EditStage::Submit);
        let timeout = self.config.submit_timeout;
        let result = tokio::time::timeout(timeout, self.edit_service.submit(&request))
            .await
            .map_err(|_| EditError::Timeout {
                stage: EditStage::Submit.to_string(),
                after: timeout,
            })
            .and_then(|submitted| submitted)
            .map_err(|e| stage_failed(&tracker, e))?;

        tracker.enter(EditStage::ExtractResult);
        let url = result
            .first_url()
            .map(str::to_string)
            .ok_or_else(|| EditError::remote(200, "Edit service returned no generated images"))
            .map_err(|e| stage_failed(&tracker, e))?;

        let timings = tracker.finish();
        info!(url = %url, total_ms = timings.total_ms, "Edit request completed");

        let PreparedEdit {
            request_id,
            source_dimensions,
            mask,
            ..
        } = prepared;
        Ok(EditOutcome {
            url,
            request_id,
            source_dimensions,
            mask,
            result,
            timings,
        })
    }

    fn assemble(&self, prepared: &PreparedEdit, prompt: &str) -> Result<EditRequest> {
        if prepared.edit_dimensions != prepared.mask.dimensions() {
            return Err(EditError::DimensionMismatch {
                source_dims: prepared.edit_dimensions,
                mask_dims: prepared.mask.dimensions(),
            });
        }
        EditRequest::assemble(
            prepared.image_png()?,
            prepared.edit_dimensions,
            prepared.mask_png()?,
            prepared.mask.dimensions(),
            prompt,
            self.config.variant_count,
        )
    }
}

fn validate_prompt(prompt: &str) -> Result<()> {
    if prompt.trim().is_empty() {
        return Err(EditError::invalid_config("Edit prompt must not be empty"));
    }
    Ok(())
}

fn stage_failed(tracker: &ProgressTracker<'_>, error: EditError) -> EditError {
    let stage = tracker.current_stage().unwrap_or(EditStage::AcquireSource);
    error!(stage = %stage, error = %error, "Edit stage failed");
    tracker.fail(&error.to_string());
    error
}
