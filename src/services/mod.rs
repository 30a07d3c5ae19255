//! Services shared by library and CLI frontends

pub mod progress;

pub use progress::{
    ConsoleProgressReporter, EditStage, EditTimings, NoOpProgressReporter, ProgressReporter,
    ProgressTracker, ProgressUpdate,
};
