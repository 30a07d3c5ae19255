//! Command-line interface for maskedit

mod config;
#[path = "main.rs"]
mod main_impl;
mod progress;

pub use main_impl::{
    main, Cli, CliBackend, CliLogFormat, CliProvider, Command, DownloadArgs, EditArgs, MaskArgs, ModelArgs,
};
pub use progress::{create_cli_progress_reporter, SpinnerProgressReporter};
