//! maskedit CLI
//!
//! Segments a source image, synthesizes an editable-region mask and submits
//! it with a prompt to an image-edit service. The resulting image URL is the
//! only thing written to stdout; logs and progress go to stderr.

use super::config::CliConfigBuilder;
use super::progress::create_cli_progress_reporter;
use crate::{
    config::EditConfig,
    download::ModelDownloader,
    edit_service::EditService,
    error::EditError,
    inference::SegmentationAdapter,
    orchestrator::EditOrchestrator,
    scratch::FsScratchStorage,
    tracing_config::init_cli_tracing,
    types::{EditRequest, EditResult},
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;

/// Prompt-driven image editing with automatically generated masks
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "maskedit")]
pub struct Cli {
    /// Enable verbose logging (-v: INFO, -vv: DEBUG, -vvv: TRACE)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log output format on stderr (json needs the tracing-json feature)
    #[arg(long, global = true, value_enum, default_value_t = CliLogFormat::Console)]
    pub log_format: CliLogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate a mask and submit an edit request; prints the result URL
    Edit(EditArgs),
    /// Write the synthesized mask without contacting the edit service
    Mask(MaskArgs),
    /// Download the segmentation model into the model directory
    DownloadModel(DownloadArgs),
    /// Show compiled-in backends and execution providers
    Providers,
}

#[derive(Args, Debug)]
pub struct ModelArgs {
    /// Directory holding model.onnx and config.json [default: platform cache]
    #[arg(long, value_name = "PATH")]
    pub model_dir: Option<PathBuf>,

    /// Inference backend
    #[arg(long, value_enum, default_value_t = CliBackend::Tract)]
    pub backend: CliBackend,

    /// Execution provider for the ONNX backend
    #[arg(long, value_enum, default_value_t = CliProvider::Auto)]
    pub execution_provider: CliProvider,

    /// Scale images smaller than the canvas up to fill it
    #[arg(long)]
    pub enlarge: bool,
}

#[derive(Args, Debug)]
pub struct EditArgs {
    /// Source image path, http(s) URL, or "-" for stdin
    #[arg(value_name = "INPUT")]
    pub input: Option<String>,

    /// Source image URL (takes priority over INPUT)
    #[arg(long)]
    pub url: Option<String>,

    /// Description of the desired edit
    #[arg(short, long)]
    pub prompt: String,

    /// Edit service credential [default: $OPENAI_API_KEY]
    #[arg(long)]
    pub api_key: Option<String>,

    /// Edit service endpoint root [default: $MASKEDIT_API_BASE_URL or OpenAI]
    #[arg(long)]
    pub api_base_url: Option<String>,

    /// Number of variants to request
    #[arg(short = 'n', long, default_value_t = 1)]
    pub variants: u8,

    /// Deadline for the edit service call in seconds
    #[arg(long, default_value_t = 120)]
    pub timeout_secs: u64,

    /// Retries for transient edit service failures (0 = at most once)
    #[arg(long, default_value_t = 0)]
    pub retries: u32,

    /// Also write the submitted mask to this file
    #[arg(long, value_name = "PATH")]
    pub mask_out: Option<PathBuf>,

    /// Show a progress bar
    #[arg(long)]
    pub progress: bool,

    #[command(flatten)]
    pub model: ModelArgs,
}

#[derive(Args, Debug)]
pub struct MaskArgs {
    /// Source image path, http(s) URL, or "-" for stdin
    #[arg(value_name = "INPUT")]
    pub input: Option<String>,

    /// Source image URL (takes priority over INPUT)
    #[arg(long)]
    pub url: Option<String>,

    /// Output PNG for the mask
    #[arg(short, long, value_name = "OUTPUT", default_value = "mask.png")]
    pub output: PathBuf,

    /// Also write the resized source image to this file
    #[arg(long, value_name = "PATH")]
    pub image_out: Option<PathBuf>,

    /// List the segmentation labels found in the image
    #[arg(long)]
    pub labels: bool,

    #[command(flatten)]
    pub model: ModelArgs,
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// URL of the exported ONNX graph
    #[arg(long)]
    pub url: String,

    /// Expected SHA-256 of the graph (hex)
    #[arg(long)]
    pub sha256: Option<String>,

    /// URL of a config.json manifest with input size and class names
    #[arg(long)]
    pub manifest_url: Option<String>,

    /// Directory to download into [default: platform cache]
    #[arg(long, value_name = "PATH")]
    pub model_dir: Option<PathBuf>,

    /// Replace files that already exist
    #[arg(long)]
    pub force: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliBackend {
    Tract,
    Onnx,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliLogFormat {
    Console,
    Compact,
    Json,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliProvider {
    Auto,
    Cpu,
    Cuda,
    Coreml,
}

/// Stand-in for commands that never reach SUBMIT
struct OfflineEditService;

#[async_trait]
impl EditService for OfflineEditService {
    async fn submit(&self, _request: &EditRequest) -> crate::error::Result<EditResult> {
        Err(EditError::invalid_config("This command does not contact the edit service"))
    }
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_format = CliConfigBuilder::log_format(cli.log_format)?;
    init_cli_tracing(cli.verbose, log_format).context("Failed to initialize tracing")?;

    match cli.command {
        Command::Edit(args) => run_edit(&args, cli.verbose).await,
        Command::Mask(args) => run_mask(&args).await,
        Command::DownloadModel(args) => download_model(&args).await,
        Command::Providers => {
            show_provider_diagnostics();
            Ok(())
        },
    }
}

async fn run_edit(args: &EditArgs, verbose: u8) -> Result<()> {
    let config = CliConfigBuilder::for_edit(args)?;
    info!("Backend: {}, model dir: {}", config.backend, config.model_dir.display());

    let input = CliConfigBuilder::input(args.input.as_deref(), args.url.as_deref())?;
    let orchestrator = EditOrchestrator::from_config(config)
        .context("Failed to set up edit pipeline")?
        .with_progress_reporter(create_cli_progress_reporter(args.progress, verbose > 0));

    let outcome = orchestrator
        .request_edit_from(input, &args.prompt)
        .await
        .context("Edit request failed")?;

    if let Some(path) = &args.mask_out {
        let png = outcome.mask.to_png()?;
        tokio::fs::write(path, png)
            .await
            .with_context(|| format!("Failed to write mask to {}", path.display()))?;
    }

    if outcome.result.images.len() > 1 {
        info!(
            "Service returned {} images; printing the first",
            outcome.result.images.len()
        );
    }
    println!("{}", outcome.url());
    Ok(())
}

async fn run_mask(args: &MaskArgs) -> Result<()> {
    let config = CliConfigBuilder::for_mask(&args.model)?;
    let source = CliConfigBuilder::input(args.input.as_deref(), args.url.as_deref())?
        .into_source()?;

    let orchestrator = offline_orchestrator(config)?;
    let prepared = orchestrator
        .prepare(source)
        .await
        .context("Mask generation failed")?;

    tokio::fs::write(&args.output, prepared.mask_png()?)
        .await
        .with_context(|| format!("Failed to write mask to {}", args.output.display()))?;
    if let Some(path) = &args.image_out {
        tokio::fs::write(path, prepared.image_png()?)
            .await
            .with_context(|| format!("Failed to write image to {}", path.display()))?;
    }

    if args.labels {
        let model = orchestrator.adapter().model().await?;
        for label in prepared.mask.distinct_labels() {
            let name = model.label_name(label).unwrap_or_default();
            println!("{label}\t{name}");
        }
    }

    eprintln!(
        "Wrote {}x{} mask ({} editable pixels) to {}",
        prepared.edit_dimensions.0,
        prepared.edit_dimensions.1,
        prepared.mask.editable_pixels(),
        args.output.display()
    );
    Ok(())
}

fn offline_orchestrator(config: EditConfig) -> Result<EditOrchestrator> {
    let adapter = SegmentationAdapter::shared(&config)?;
    let scratch = Arc::new(
        FsScratchStorage::new(config.scratch_dir.clone())
            .context("Failed to create scratch directory")?,
    );
    Ok(EditOrchestrator::new(
        config,
        adapter,
        Arc::new(OfflineEditService),
        scratch,
    )?)
}

async fn download_model(args: &DownloadArgs) -> Result<()> {
    let model_dir = args
        .model_dir
        .clone()
        .unwrap_or_else(crate::config::default_model_dir);

    let downloader = ModelDownloader::new()
        .context("Failed to create model downloader")?
        .force(args.force)
        .show_progress(true);

    let model_path = downloader
        .download(&args.url, &model_dir, args.sha256.as_deref())
        .await
        .context("Failed to download model")?;
    eprintln!("Model saved to {}", model_path.display());

    if let Some(manifest_url) = &args.manifest_url {
        let manifest_path = downloader
            .download_file(
                manifest_url,
                &model_dir.join(crate::models::MANIFEST_FILE),
                None,
            )
            .await
            .context("Failed to download model manifest")?;
        crate::models::ModelAssets::open(&model_dir)
            .with_context(|| format!("Invalid manifest at {}", manifest_path.display()))?;
        eprintln!("Manifest saved to {}", manifest_path.display());
    }
    Ok(())
}

fn show_provider_diagnostics() {
    println!("Backends");
    let status = |compiled: bool| if compiled { "available" } else { "not compiled" };
    println!("  tract: {}", status(cfg!(feature = "tract")));
    println!("  onnx:  {}", status(cfg!(feature = "onnx")));

    #[cfg(feature = "onnx")]
    {
        println!("\nONNX Runtime execution providers");
        for (name, available, description) in crate::backends::OnnxModelLoader::list_providers() {
            let status = if available { "yes" } else { "no" };
            println!("  {name:<8} {status:<4} {description}");
        }
    }

    println!("\nUsage:");
    println!("  --backend tract                               # pure Rust (default)");
    println!("  --backend onnx --execution-provider auto      # best available provider");
    println!("  --backend onnx --execution-provider cuda      # NVIDIA CUDA");
    println!("  --backend onnx --execution-provider coreml    # Apple CoreML");
}
