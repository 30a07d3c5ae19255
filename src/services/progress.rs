//! Progress reporting service
//!
//! This module separates progress reporting concerns from the pipeline,
//! allowing different frontends to implement their own progress handling.

use instant::Instant;
use std::fmt;

/// Stages of one edit request, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditStage {
    /// Obtaining source bytes from a URL, buffer or path
    AcquireSource,
    /// Fitting the source onto the edit service canvas
    ResizeToEditRes,
    /// Fitting the source onto the model input canvas
    ResizeToInferenceRes,
    /// Running semantic segmentation
    Infer,
    /// Turning labels into the selection mask
    SynthesizeMask,
    /// Building and validating the edit request
    AssembleRequest,
    /// Calling the edit service
    Submit,
    /// Picking the result URL
    ExtractResult,
}

impl EditStage {
    /// All stages in execution order
    pub const ALL: [EditStage; 8] = [
        EditStage::AcquireSource,
        EditStage::ResizeToEditRes,
        EditStage::ResizeToInferenceRes,
        EditStage::Infer,
        EditStage::SynthesizeMask,
        EditStage::AssembleRequest,
        EditStage::Submit,
        EditStage::ExtractResult,
    ];

    /// Stable identifier used in logs and errors
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            EditStage::AcquireSource => "acquire_source",
            EditStage::ResizeToEditRes => "resize_to_edit_res",
            EditStage::ResizeToInferenceRes => "resize_to_inference_res",
            EditStage::Infer => "infer",
            EditStage::SynthesizeMask => "synthesize_mask",
            EditStage::AssembleRequest => "assemble_request",
            EditStage::Submit => "submit",
            EditStage::ExtractResult => "extract_result",
        }
    }

    /// Get a human-readable description of the stage
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            EditStage::AcquireSource => "Loading source image",
            EditStage::ResizeToEditRes => "Resizing to edit resolution",
            EditStage::ResizeToInferenceRes => "Resizing to inference resolution",
            EditStage::Infer => "Running segmentation",
            EditStage::SynthesizeMask => "Synthesizing mask",
            EditStage::AssembleRequest => "Assembling edit request",
            EditStage::Submit => "Submitting to edit service",
            EditStage::ExtractResult => "Extracting result",
        }
    }

    /// Get the typical progress percentage for this stage
    #[must_use]
    pub fn progress_percentage(&self) -> u8 {
        match self {
            EditStage::AcquireSource => 5,
            EditStage::ResizeToEditRes => 10,
            EditStage::ResizeToInferenceRes => 15,
            EditStage::Infer => 40,
            EditStage::SynthesizeMask => 50,
            EditStage::AssembleRequest => 55,
            EditStage::Submit => 60,
            EditStage::ExtractResult => 99,
        }
    }
}

impl fmt::Display for EditStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Progress update containing stage and timing information
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Current stage
    pub stage: EditStage,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Human-readable stage description
    pub description: String,
    /// Elapsed time since the request started (milliseconds)
    pub elapsed_ms: u64,
}

impl ProgressUpdate {
    #[must_use]
    pub fn new(stage: EditStage, start_time: Instant) -> Self {
        Self {
            progress: stage.progress_percentage(),
            description: stage.description().to_string(),
            elapsed_ms: start_time.elapsed().as_millis() as u64,
            stage,
        }
    }
}

/// Wall-clock time spent per stage of one request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditTimings {
    /// `(stage, milliseconds)` in execution order
    pub stages: Vec<(EditStage, u64)>,
    /// Total request time in milliseconds
    pub total_ms: u64,
}

impl EditTimings {
    /// Time spent in `stage`, if it ran
    #[must_use]
    pub fn stage_ms(&self, stage: EditStage) -> Option<u64> {
        self.stages
            .iter()
            .find(|(recorded, _)| *recorded == stage)
            .map(|(_, ms)| *ms)
    }
}

/// Trait for receiving progress updates during an edit request
pub trait ProgressReporter: Send + Sync {
    /// Report entry into a stage
    fn report_progress(&self, update: ProgressUpdate);

    /// Report successful completion
    fn report_completion(&self, timings: &EditTimings);

    /// Report a failure in `stage`
    fn report_error(&self, stage: EditStage, error: &str);
}

/// No-op progress reporter for when progress reporting is disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: ProgressUpdate) {}

    fn report_completion(&self, _timings: &EditTimings) {}

    fn report_error(&self, _stage: EditStage, _error: &str) {}
}

/// Console progress reporter that logs progress through `log`
#[derive(Debug, Default)]
pub struct ConsoleProgressReporter {
    verbose: bool,
}

impl ConsoleProgressReporter {
    /// Create a new console progress reporter
    ///
    /// # Arguments
    /// * `verbose` - Whether to show per-stage timings
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        if self.verbose {
            log::info!(
                "[{}%] {} ({}ms elapsed)",
                update.progress,
                update.description,
                update.elapsed_ms
            );
        } else {
            log::info!("[{}%] {}", update.progress, update.description);
        }
    }

    fn report_completion(&self, timings: &EditTimings) {
        log::info!("Edit request completed in {}ms", timings.total_ms);
        if self.verbose {
            for (stage, ms) in &timings.stages {
                log::info!("  {}: {}ms", stage.description(), ms);
            }
        }
    }

    fn report_error(&self, stage: EditStage, error: &str) {
        log::error!("Error during {}: {}", stage.description(), error);
    }
}

/// Tracks stage entry and timing for one request
pub struct ProgressTracker<'a> {
    reporter: &'a dyn ProgressReporter,
    start_time: Instant,
    current: Option<(EditStage, Instant)>,
    timings: EditTimings,
}

impl<'a> ProgressTracker<'a> {
    #[must_use]
    pub fn new(reporter: &'a dyn ProgressReporter) -> Self {
        Self {
            reporter,
            start_time: Instant::now(),
            current: None,
            timings: EditTimings::default(),
        }
    }

    /// Enter `stage`, closing the timing of the previous one
    pub fn enter(&mut self, stage: EditStage) {
        self.close_current();
        self.current = Some((stage, Instant::now()));
        self.reporter
            .report_progress(ProgressUpdate::new(stage, self.start_time));
    }

    /// Current stage, if any was entered
    #[must_use]
    pub fn current_stage(&self) -> Option<EditStage> {
        self.current.map(|(stage, _)| stage)
    }

    /// Report a failure in the current stage
    pub fn fail(&self, error: &str) {
        let stage = self.current_stage().unwrap_or(EditStage::AcquireSource);
        self.reporter.report_error(stage, error);
    }

    /// Close the last stage and report completion
    pub fn finish(mut self) -> EditTimings {
        self.close_current();
        self.timings.total_ms = self.start_time.elapsed().as_millis() as u64;
        self.reporter.report_completion(&self.timings);
        self.timings
    }

    fn close_current(&mut self) {
        if let Some((stage, started)) = self.current.take() {
            self.timings
                .stages
                .push((stage, started.elapsed().as_millis() as u64));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Test progress reporter that captures reports for verification
    #[derive(Default)]
    struct TestProgressReporter {
        stages: Mutex<Vec<EditStage>>,
        completions: Mutex<Vec<EditTimings>>,
        errors: Mutex<Vec<(EditStage, String)>>,
    }

    impl ProgressReporter for TestProgressReporter {
        fn report_progress(&self, update: ProgressUpdate) {
            self.stages.lock().unwrap().push(update.stage);
        }

        fn report_completion(&self, timings: &EditTimings) {
            self.completions.lock().unwrap().push(timings.clone());
        }

        fn report_error(&self, stage: EditStage, error: &str) {
            self.errors.lock().unwrap().push((stage, error.to_string()));
        }
    }

    #[test]
    fn test_stage_names_and_ordering() {
        assert_eq!(EditStage::Submit.to_string(), "submit");
        assert_eq!(EditStage::ResizeToInferenceRes.name(), "resize_to_inference_res");

        let percentages: Vec<u8> = EditStage::ALL
            .iter()
            .map(EditStage::progress_percentage)
            .collect();
        assert!(percentages.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_tracker_records_stage_timings() {
        let reporter = TestProgressReporter::default();
        let mut tracker = ProgressTracker::new(&reporter);
        tracker.enter(EditStage::AcquireSource);
        tracker.enter(EditStage::Infer);
        let timings = tracker.finish();

        assert_eq!(
            *reporter.stages.lock().unwrap(),
            vec![EditStage::AcquireSource, EditStage::Infer]
        );
        assert_eq!(timings.stages.len(), 2);
        assert!(timings.stage_ms(EditStage::Infer).is_some());
        assert!(timings.stage_ms(EditStage::Submit).is_none());
        assert_eq!(reporter.completions.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_tracker_reports_error_in_current_stage() {
        let reporter = TestProgressReporter::default();
        let mut tracker = ProgressTracker::new(&reporter);
        tracker.enter(EditStage::Submit);
        tracker.fail("HTTP 500");
        assert_eq!(
            *reporter.errors.lock().unwrap(),
            vec![(EditStage::Submit, "HTTP 500".to_string())]
        );
    }
}
