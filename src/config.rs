//! Configuration types for mask synthesis and edit submission

use crate::error::{EditError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Side length of the square canvas the edit service requires
pub const DEFAULT_EDIT_SIZE: u32 = 1024;

/// Side length of the square input the segmentation model expects
pub const DEFAULT_INFERENCE_SIZE: u32 = 513;

/// Default edit service endpoint root
pub const DEFAULT_API_BASE_URL: &str = "https://api.openai.com/v1";

/// Environment variable holding the edit service credential
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Environment variable overriding the model asset directory
pub const MODEL_DIR_ENV: &str = "MASKEDIT_MODEL_DIR";

/// Environment variable overriding the edit service endpoint root
pub const API_BASE_URL_ENV: &str = "MASKEDIT_API_BASE_URL";

const MAX_VARIANT_COUNT: u8 = 10;

/// Inference runtime used to execute the segmentation graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendType {
    /// Tract backend (pure Rust, no external dependencies)
    Tract,
    /// ONNX Runtime backend (supports GPU acceleration)
    Onnx,
}

impl Default for BackendType {
    fn default() -> Self {
        Self::Tract
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tract => write!(f, "tract"),
            Self::Onnx => write!(f, "onnx"),
        }
    }
}

impl std::str::FromStr for BackendType {
    type Err = EditError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tract" => Ok(Self::Tract),
            "onnx" => Ok(Self::Onnx),
            other => Err(EditError::invalid_config(format!(
                "Unknown backend '{other}'. Expected 'tract' or 'onnx'"
            ))),
        }
    }
}

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon GPU acceleration
    CoreMl,
}

/// Bounded retry with exponential backoff around edit submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one (1 = no retry)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_backoff: Duration,
    /// Upper bound for any single delay
    pub max_backoff: Duration,
    /// Growth factor applied after each failed attempt
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::no_retry()
    }
}

impl RetryPolicy {
    /// At-most-once submission
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            multiplier: 2.0,
        }
    }

    /// Exponential backoff with the given number of total attempts
    #[must_use]
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::no_retry()
        }
    }

    /// Delay to wait after the given (1-based) failed attempt
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let millis = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

/// Configuration for one edit pipeline
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct EditConfig {
    /// Square canvas size the edit service requires (source and mask)
    pub edit_size: u32,

    /// Square input size of the segmentation model
    pub inference_size: u32,

    /// Number of generated variants to request
    pub variant_count: u8,

    /// Edit service endpoint root, without trailing slash
    pub api_base_url: String,

    /// Bearer credential for the edit service
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Deadline for the SUBMIT stage
    pub submit_timeout: Duration,

    /// Retry behaviour around SUBMIT
    pub retry: RetryPolicy,

    /// Directory holding `model.onnx` and an optional `config.json`
    pub model_dir: PathBuf,

    /// Runtime used to execute the model
    pub backend: BackendType,

    /// Execution provider when `backend` is ONNX
    pub execution_provider: ExecutionProvider,

    /// Directory for request-scoped artifacts
    pub scratch_dir: PathBuf,

    /// Allow the resizer to scale images smaller than the canvas up
    pub enlarge: bool,
}

impl std::fmt::Debug for EditConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditConfig")
            .field("edit_size", &self.edit_size)
            .field("inference_size", &self.inference_size)
            .field("variant_count", &self.variant_count)
            .field("api_base_url", &self.api_base_url)
            .field("api_key", &self.api_key.as_deref().map(redact_key))
            .field("submit_timeout", &self.submit_timeout)
            .field("retry", &self.retry)
            .field("model_dir", &self.model_dir)
            .field("backend", &self.backend)
            .field("execution_provider", &self.execution_provider)
            .field("scratch_dir", &self.scratch_dir)
            .field("enlarge", &self.enlarge)
            .finish()
    }
}

/// Keep only a short prefix of a credential for diagnostics
#[must_use]
pub fn redact_key(key: &str) -> String {
    let prefix: String = key.chars().take(6).collect();
    if key.chars().count() > 6 {
        format!("{prefix}***")
    } else {
        "***".to_string()
    }
}

impl Default for EditConfig {
    fn default() -> Self {
        Self {
            edit_size: DEFAULT_EDIT_SIZE,
            inference_size: DEFAULT_INFERENCE_SIZE,
            variant_count: 1,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_key: None,
            submit_timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
            model_dir: default_model_dir(),
            backend: BackendType::default(),
            execution_provider: ExecutionProvider::default(),
            scratch_dir: std::env::temp_dir().join("maskedit"),
            enlarge: false,
        }
    }
}

/// Platform cache location for the segmentation model assets
#[must_use]
pub fn default_model_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("maskedit")
        .join("models")
        .join("deeplabv3-ade20k")
}

impl EditConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    /// ```rust
    /// use maskedit::EditConfig;
    ///
    /// let config = EditConfig::builder()
    ///     .api_key("sk-test")
    ///     .variant_count(2)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.edit_size, 1024);
    /// assert_eq!(config.variant_count, 2);
    /// ```
    #[must_use]
    pub fn builder() -> EditConfigBuilder {
        EditConfigBuilder::default()
    }

    /// Build a configuration from the process environment
    ///
    /// Reads the credential from `OPENAI_API_KEY` and the optional
    /// `MASKEDIT_MODEL_DIR` / `MASKEDIT_API_BASE_URL` overrides.
    ///
    /// # Errors
    /// - `OPENAI_API_KEY` is unset or empty
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                EditError::invalid_config(format!("{API_KEY_ENV} is not set"))
            })?;

        let mut builder = Self::builder().api_key(api_key);
        if let Ok(dir) = std::env::var(MODEL_DIR_ENV) {
            builder = builder.model_dir(dir);
        }
        if let Ok(url) = std::env::var(API_BASE_URL_ENV) {
            builder = builder.api_base_url(url);
        }
        builder.build()
    }

    /// The `size` field sent to the edit service, e.g. `1024x1024`
    #[must_use]
    pub fn size_param(&self) -> String {
        format!("{0}x{0}", self.edit_size)
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Zero edit or inference size
    /// - Variant count outside 1-10
    /// - Zero submit timeout or retry attempts
    /// - Base URL that is not http(s)
    pub fn validate(&self) -> Result<()> {
        if self.edit_size == 0 {
            return Err(EditError::invalid_dimension("edit_size must be > 0"));
        }
        if self.inference_size == 0 {
            return Err(EditError::invalid_dimension("inference_size must be > 0"));
        }
        if self.variant_count == 0 || self.variant_count > MAX_VARIANT_COUNT {
            return Err(EditError::config_value_error(
                "variant_count",
                self.variant_count,
                "1-10",
            ));
        }
        if self.submit_timeout.is_zero() {
            return Err(EditError::invalid_config("submit_timeout must be > 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(EditError::config_value_error(
                "retry.max_attempts",
                self.retry.max_attempts,
                ">= 1",
            ));
        }
        if !(self.api_base_url.starts_with("https://") || self.api_base_url.starts_with("http://"))
        {
            return Err(EditError::invalid_config(format!(
                "api_base_url must be an http(s) URL: {}",
                self.api_base_url
            )));
        }
        Ok(())
    }
}

/// Builder for `EditConfig`
#[derive(Debug, Default)]
pub struct EditConfigBuilder {
    config: EditConfig,
}

impl EditConfigBuilder {
    #[must_use]
    pub fn edit_size(mut self, size: u32) -> Self {
        self.config.edit_size = size;
        self
    }

    #[must_use]
    pub fn inference_size(mut self, size: u32) -> Self {
        self.config.inference_size = size;
        self
    }

    #[must_use]
    pub fn variant_count(mut self, count: u8) -> Self {
        self.config.variant_count = count;
        self
    }

    #[must_use]
    pub fn api_base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn api_key<S: Into<String>>(mut self, key: S) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn submit_timeout(mut self, timeout: Duration) -> Self {
        self.config.submit_timeout = timeout;
        self
    }

    #[must_use]
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    #[must_use]
    pub fn model_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.model_dir = dir.into();
        self
    }

    #[must_use]
    pub fn backend(mut self, backend: BackendType) -> Self {
        self.config.backend = backend;
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    #[must_use]
    pub fn scratch_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.scratch_dir = dir.into();
        self
    }

    #[must_use]
    pub fn enlarge(mut self, enlarge: bool) -> Self {
        self.config.enlarge = enlarge;
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    /// - Any rule checked by [`EditConfig::validate`]
    pub fn build(self) -> Result<EditConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
