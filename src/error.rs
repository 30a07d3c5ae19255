//! Error types for mask synthesis and edit requests

use std::time::Duration;
use thiserror::Error;

/// Result type alias for maskedit operations
pub type Result<T> = std::result::Result<T, EditError>;

/// Every failure a pipeline stage can surface
#[derive(Error, Debug)]
pub enum EditError {
    /// Input bytes are not a decodable raster image
    #[error("Decode error: {0}")]
    Decode(String),

    /// A requested canvas or output dimension is unusable
    #[error("Invalid dimension: {0}")]
    InvalidDimension(String),

    /// Model assets are missing, unreadable or not a valid graph
    #[error("Model load error: {0}")]
    ModelLoad(String),

    /// Malformed input tensor or failed forward pass
    #[error("Inference error: {0}")]
    Inference(String),

    /// Label grid with zero area
    #[error("Empty label grid: {width}x{height}")]
    EmptyGrid { width: u32, height: u32 },

    /// None of URL, buffer or path was supplied
    #[error("No image input provided: supply a URL, an in-memory buffer, or a local path")]
    NoInputProvided,

    /// Source image and mask differ in size at submission time
    #[error(
        "Dimension mismatch: source is {}x{} but mask is {}x{}",
        source_dims.0, source_dims.1, mask_dims.0, mask_dims.1
    )]
    DimensionMismatch {
        source_dims: (u32, u32),
        mask_dims: (u32, u32),
    },

    /// Non-success response from a remote service
    #[error("Remote service error (HTTP {status}): {message}")]
    RemoteService {
        status: u16,
        message: String,
        retryable: bool,
    },

    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport-level HTTP failure
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A stage exceeded its deadline
    #[error("Stage '{stage}' timed out after {}ms", after.as_millis())]
    Timeout { stage: String, after: Duration },

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EditError {
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    pub fn invalid_dimension<S: Into<String>>(msg: S) -> Self {
        Self::InvalidDimension(msg.into())
    }

    pub fn model_load<S: Into<String>>(msg: S) -> Self {
        Self::ModelLoad(msg.into())
    }

    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a remote service error, classifying retryability from the status
    pub fn remote<S: Into<String>>(status: u16, message: S) -> Self {
        Self::RemoteService {
            status,
            message: message.into(),
            retryable: Self::status_is_retryable(status),
        }
    }

    /// Create a network error with operation context
    pub fn network_error(operation: &str, error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            return Self::Timeout {
                stage: operation.to_string(),
                after: Duration::ZERO,
            };
        }
        Self::Network(format!("{operation}: {error}"))
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        Self::Io(std::io::Error::new(
            error.kind(),
            format!(
                "Failed to {} '{}': {}",
                operation,
                path.as_ref().display(),
                error
            ),
        ))
    }

    /// Create model load error with troubleshooting context
    pub fn model_error_with_context<P: AsRef<std::path::Path>>(
        operation: &str,
        model_path: P,
        error: &str,
        suggestions: &[&str],
    ) -> Self {
        let suggestion_text = if suggestions.is_empty() {
            String::new()
        } else {
            format!(" Suggestions: {}", suggestions.join(", "))
        };

        Self::ModelLoad(format!(
            "Failed to {} model '{}': {}.{}",
            operation,
            model_path.as_ref().display(),
            error,
            suggestion_text
        ))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
    ) -> Self {
        Self::InvalidConfig(format!(
            "Invalid {parameter}: {value} (valid range: {valid_range})"
        ))
    }

    /// HTTP statuses worth another attempt
    #[must_use]
    pub fn status_is_retryable(status: u16) -> bool {
        matches!(status, 408 | 409 | 429) || (500..=599).contains(&status)
    }

    /// Whether a retry policy may attempt the failed operation again
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RemoteService { retryable, .. } => *retryable,
            Self::Timeout { .. } | Self::Network(_) => true,
            _ => false,
        }
    }
}

impl From<image::ImageError> for EditError {
    fn from(error: image::ImageError) -> Self {
        match error {
            image::ImageError::Decoding(_) | image::ImageError::Unsupported(_) => {
                Self::Decode(error.to_string())
            },
            image::ImageError::Limits(_) | image::ImageError::Parameter(_) => {
                Self::InvalidDimension(error.to_string())
            },
            image::ImageError::IoError(e) => Self::Io(e),
            image::ImageError::Encoding(_) => Self::Internal(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_error_display() {
        let err = EditError::invalid_config("missing api key");
        assert_eq!(err.to_string(), "Invalid configuration: missing api key");

        let err = EditError::DimensionMismatch {
            source_dims: (1024, 1024),
            mask_dims: (513, 513),
        };
        assert_eq!(
            err.to_string(),
            "Dimension mismatch: source is 1024x1024 but mask is 513x513"
        );
    }

    #[test]
    fn test_remote_error_classification() {
        assert!(EditError::remote(429, "slow down").is_retryable());
        assert!(EditError::remote(503, "unavailable").is_retryable());
        assert!(!EditError::remote(400, "bad mask").is_retryable());
        assert!(!EditError::remote(401, "bad key").is_retryable());
        assert!(!EditError::NoInputProvided.is_retryable());
        assert!(EditError::Network("reset".into()).is_retryable());
    }

    #[test]
    fn test_enhanced_error_context() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = EditError::file_io_error("read source image", Path::new("/tmp/dog.jpg"), &io_error);
        let error_string = err.to_string();
        assert!(error_string.contains("read source image"));
        assert!(error_string.contains("/tmp/dog.jpg"));

        let err = EditError::model_error_with_context(
            "load",
            Path::new("/models/deeplab"),
            "model.onnx not found",
            &["run `maskedit download-model`"],
        );
        assert!(matches!(err, EditError::ModelLoad(_)));
        assert!(err.to_string().contains("Suggestions"));

        let err = EditError::config_value_error("variant_count", 42, "1-10");
        assert!(err.to_string().contains("variant_count"));
        assert!(err.to_string().contains("1-10"));
    }

    #[test]
    fn test_image_error_maps_to_decode() {
        let err: EditError = image::load_from_memory(b"definitely not an image")
            .unwrap_err()
            .into();
        assert!(matches!(err, EditError::Decode(_)));
    }
}
