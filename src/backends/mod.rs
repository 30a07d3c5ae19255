//! Runtime implementations of the segmentation model
//!
//! - Tract backend (pure Rust, no external dependencies)
//! - ONNX Runtime backend (GPU acceleration)
//! - In-memory mock used by tests and dry runs

pub mod mock;

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "tract")]
pub mod tract;

pub use self::mock::{MockModelLoader, MockSegmentationModel};

#[cfg(feature = "onnx")]
pub use self::onnx::{OnnxModelLoader, OnnxSegmentationModel};

#[cfg(feature = "tract")]
pub use self::tract::{TractModelLoader, TractSegmentationModel};
