//! Conversion from CLI arguments to library configuration

use crate::cli::main_impl::{CliBackend, CliLogFormat, CliProvider, EditArgs, ModelArgs};
use crate::{
    config::{
        BackendType, EditConfig, EditConfigBuilder, ExecutionProvider, RetryPolicy,
        API_BASE_URL_ENV, API_KEY_ENV, MODEL_DIR_ENV,
    },
    source::ImageInput,
    tracing_config::TracingFormat,
};
use anyhow::{Context, Result};
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

/// Convert CLI arguments to `EditConfig`
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Configuration for segmentation only; no credential needed
    pub(crate) fn for_mask(model: &ModelArgs) -> Result<EditConfig> {
        Self::model_builder(model)
            .build()
            .context("Invalid configuration")
    }

    /// Configuration for a full edit request
    pub(crate) fn for_edit(args: &EditArgs) -> Result<EditConfig> {
        let api_key = args
            .api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|key| !key.trim().is_empty())
            .with_context(|| format!("No API key given; pass --api-key or set {API_KEY_ENV}"))?;

        let mut builder = Self::model_builder(&args.model)
            .api_key(api_key)
            .variant_count(args.variants)
            .submit_timeout(Duration::from_secs(args.timeout_secs))
            .retry(RetryPolicy::with_attempts(args.retries.saturating_add(1)));

        if let Some(url) = args
            .api_base_url
            .clone()
            .or_else(|| std::env::var(API_BASE_URL_ENV).ok())
        {
            builder = builder.api_base_url(url);
        }

        builder.build().context("Invalid configuration")
    }

    fn model_builder(model: &ModelArgs) -> EditConfigBuilder {
        let mut builder = EditConfig::builder()
            .backend(Self::backend(model.backend))
            .execution_provider(Self::provider(model.execution_provider))
            .enlarge(model.enlarge);

        if let Some(dir) = Self::model_dir(model) {
            builder = builder.model_dir(dir);
        }
        builder
    }

    /// `--model-dir`, then `MASKEDIT_MODEL_DIR`, then the platform default
    pub(crate) fn model_dir(model: &ModelArgs) -> Option<PathBuf> {
        model
            .model_dir
            .clone()
            .or_else(|| std::env::var(MODEL_DIR_ENV).ok().map(PathBuf::from))
    }

    fn backend(backend: CliBackend) -> BackendType {
        match backend {
            CliBackend::Tract => BackendType::Tract,
            CliBackend::Onnx => BackendType::Onnx,
        }
    }

    /// Log format requested on the command line
    pub(crate) fn log_format(format: CliLogFormat) -> Result<TracingFormat> {
        match format {
            CliLogFormat::Console => Ok(TracingFormat::Console),
            CliLogFormat::Compact => Ok(TracingFormat::Compact),
            #[cfg(feature = "tracing-json")]
            CliLogFormat::Json => Ok(TracingFormat::Json),
            #[cfg(not(feature = "tracing-json"))]
            CliLogFormat::Json => anyhow::bail!(
                "JSON logging is not available in this build. Rebuild with --features tracing-json"
            ),
        }
    }

    fn provider(provider: CliProvider) -> ExecutionProvider {
        match provider {
            CliProvider::Auto => ExecutionProvider::Auto,
            CliProvider::Cpu => ExecutionProvider::Cpu,
            CliProvider::Cuda => ExecutionProvider::Cuda,
            CliProvider::Coreml => ExecutionProvider::CoreMl,
        }
    }

    /// Interpret the positional input and `--url`
    ///
    /// `-` reads the image from stdin; an `http(s)://` argument is a URL.
    pub(crate) fn input(input: Option<&str>, url: Option<&str>) -> Result<ImageInput> {
        let mut image_input = ImageInput::default();
        if let Some(url) = url {
            image_input = image_input.with_url(url);
        }
        match input {
            Some("-") => {
                let mut buffer = Vec::new();
                std::io::stdin()
                    .read_to_end(&mut buffer)
                    .context("Failed to read image from stdin")?;
                image_input = image_input.with_bytes(buffer);
            },
            Some(arg) if arg.starts_with("http://") || arg.starts_with("https://") => {
                if image_input.url.is_none() {
                    image_input = image_input.with_url(arg);
                }
            },
            Some(arg) => image_input = image_input.with_path(arg),
            None => {},
        }
        Ok(image_input)
    }
}
