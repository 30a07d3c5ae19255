//! Terminal progress display for edit requests

use crate::services::progress::{
    ConsoleProgressReporter, EditStage, EditTimings, ProgressReporter, ProgressUpdate,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;

/// Spinner on stderr that follows the pipeline stages
#[derive(Debug)]
pub struct SpinnerProgressReporter {
    bar: ProgressBar,
    verbose: bool,
}

impl SpinnerProgressReporter {
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        let bar = ProgressBar::new(100);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos:>3}% {msg}")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar, verbose }
    }
}

impl ProgressReporter for SpinnerProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        self.bar.set_position(u64::from(update.progress));
        self.bar.set_message(update.description);
    }

    fn report_completion(&self, timings: &EditTimings) {
        self.bar.set_position(100);
        self.bar.finish_with_message(format!("Done in {}ms", timings.total_ms));
        if self.verbose {
            for (stage, ms) in &timings.stages {
                log::info!("  {}: {}ms", stage.description(), ms);
            }
        }
    }

    fn report_error(&self, stage: EditStage, error: &str) {
        self.bar
            .abandon_with_message(format!("Failed during {}: {error}", stage.description()));
    }
}

/// Pick the reporter for the `--progress` and `-v` flags
#[must_use]
pub fn create_cli_progress_reporter(
    enable_progress: bool,
    verbose: bool,
) -> Arc<dyn ProgressReporter> {
    if enable_progress {
        Arc::new(SpinnerProgressReporter::new(verbose))
    } else {
        Arc::new(ConsoleProgressReporter::new(verbose))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use instant::Instant;

    #[test]
    fn test_spinner_follows_stages() {
        let reporter = SpinnerProgressReporter::new(false);
        reporter.report_progress(ProgressUpdate::new(EditStage::Infer, Instant::now()));
        assert_eq!(reporter.bar.position(), 40);
        reporter.report_completion(&EditTimings::default());
        assert_eq!(reporter.bar.position(), 100);
        assert!(reporter.bar.is_finished());
    }

    #[test]
    fn test_create_cli_progress_reporter() {
        // Both variants are usable as trait objects
        for enabled in [false, true] {
            let reporter = create_cli_progress_reporter(enabled, true);
            reporter.report_error(EditStage::Submit, "HTTP 500");
        }
    }
}
