#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # maskedit
//!
//! Region-targeted image editing driven by semantic segmentation.
//!
//! A source image is fitted onto the edit service's square canvas, a
//! segmentation model labels every pixel, and the labels become a mask whose
//! opaque pixels mark the region the service may repaint while transparent
//! pixels are preserved. The source,
//! the mask and a free-text prompt are then submitted to an
//! OpenAI-compatible `/images/edits` endpoint and the URL of the first
//! generated image is returned.
//!
//! ## Features
//!
//! - **Contain-fit resizing** onto a transparent square canvas
//! - **Single-flight model loading**: one load per process, shared by all requests
//! - **Two inference backends**: Tract (pure Rust, default) and ONNX Runtime
//! - **Deterministic mask synthesis** with the raw label grid kept alongside
//! - **Bounded submission**: per-request deadline and opt-in retry policy
//! - **Scoped scratch storage** removed on success and failure alike
//! - **CLI** (enable with the `cli` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use maskedit::{EditConfig, EditOrchestrator, ImageSource};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = EditConfig::builder()
//!     .api_key(std::env::var("OPENAI_API_KEY")?)
//!     .model_dir("/opt/models/deeplabv3-ade20k")
//!     .build()?;
//! let orchestrator = EditOrchestrator::from_config(config)?;
//!
//! let outcome = orchestrator
//!     .request_edit(ImageSource::Path("room.jpg".into()), "paint the walls green")
//!     .await?;
//! println!("{}", outcome.url());
//! # Ok(())
//! # }
//! ```
//!
//! ## Mask only
//!
//! ```rust
//! use maskedit::{LabelGrid, MaskSynthesizer};
//!
//! # fn main() -> maskedit::Result<()> {
//! let grid = LabelGrid::from_rows(&[vec![0, 0], vec![0, 5]])?;
//! let mask = MaskSynthesizer::synthesize(&grid, 1024, 1024)?;
//! assert_eq!(mask.dimensions(), (1024, 1024));
//!
//! // Background is transparent (kept), the labelled object opaque (repainted)
//! assert_eq!(mask.image.get_pixel(0, 0).0[3], 0);
//! assert_eq!(mask.image.get_pixel(1023, 1023).0[3], 255);
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `tract` (default): Pure Rust inference backend
//! - `onnx`: ONNX Runtime backend with CUDA / `CoreML` execution providers
//! - `cli` (default): Command-line interface and progress display
//! - `tracing-json`: JSON log output for the CLI
//! - `webp-support`: WebP source images

pub mod backends;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod download;
pub mod edit_service;
pub mod error;
pub mod inference;
pub mod mask;
pub mod models;
pub mod orchestrator;
pub mod resize;
pub mod scratch;
pub mod services;
pub mod source;
pub mod tracing_config;
pub mod types;

use tokio::io::AsyncRead;

// Public API exports
pub use backends::{MockModelLoader, MockSegmentationModel};
#[cfg(feature = "onnx")]
pub use backends::{OnnxModelLoader, OnnxSegmentationModel};
#[cfg(feature = "tract")]
pub use backends::{TractModelLoader, TractSegmentationModel};
pub use config::{BackendType, EditConfig, EditConfigBuilder, ExecutionProvider, RetryPolicy};
pub use download::ModelDownloader;
pub use edit_service::{EditService, HttpEditService, RetryingEditService};
pub use error::{EditError, Result};
pub use inference::{ModelLoader, SegmentationAdapter, SegmentationModel};
pub use mask::MaskSynthesizer;
pub use models::{ModelAssets, ModelManifest};
pub use orchestrator::{EditOrchestrator, EditOutcome, PreparedEdit};
pub use resize::CanvasResizer;
pub use scratch::{FsScratchStorage, MemoryScratchStorage, ScratchScope, ScratchStorage};
pub use services::{
    ConsoleProgressReporter, EditStage, EditTimings, NoOpProgressReporter, ProgressReporter,
    ProgressUpdate,
};
pub use source::{ImageInput, ImageSource};
pub use tracing_config::{TracingConfig, TracingFormat};
pub use types::{CanvasParams, EditRequest, EditResult, GeneratedImage, LabelGrid, Mask};

#[cfg(feature = "cli")]
pub use tracing_config::init_cli_tracing;

/// Run one edit request with configuration from the environment
///
/// Reads `OPENAI_API_KEY` and the optional `MASKEDIT_MODEL_DIR` /
/// `MASKEDIT_API_BASE_URL` overrides, then runs the full pipeline. The model
/// is loaded once per process and reused by later calls.
///
/// # Errors
/// - `InvalidConfig` when the credential is missing or the prompt is blank
/// - Whatever the failing pipeline stage produced
///
/// # Examples
/// ```rust,no_run
/// use maskedit::{request_edit, ImageSource};
///
/// # async fn example() -> maskedit::Result<()> {
/// let url = request_edit(
///     ImageSource::Url("https://example.com/street.jpg".to_string()),
///     "replace the sky with a sunset",
/// )
/// .await?;
/// println!("{url}");
/// # Ok(())
/// # }
/// ```
pub async fn request_edit(source: ImageSource, prompt: &str) -> Result<String> {
    let orchestrator = EditOrchestrator::from_config(EditConfig::from_env()?)?;
    let outcome = orchestrator.request_edit(source, prompt).await?;
    Ok(outcome.url)
}

/// Run one edit request on an image read from an async stream
///
/// # Errors
/// - `Io` when the stream cannot be read
/// - Everything [`request_edit`] can return
pub async fn request_edit_from_reader<R: AsyncRead + Unpin>(
    mut reader: R,
    prompt: &str,
) -> Result<String> {
    let mut buffer = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut buffer).await?;
    request_edit(ImageSource::Bytes(buffer), prompt).await
}
