//! Model asset directory resolution
//!
//! A model directory holds the exported graph as `model.onnx` and may carry a
//! `config.json` manifest describing the input resolution and class names.

use crate::error::{EditError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the exported segmentation graph
pub const MODEL_FILE: &str = "model.onnx";

/// File name of the optional manifest
pub const MANIFEST_FILE: &str = "config.json";

/// Metadata describing a segmentation model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelManifest {
    /// Display name for logs
    #[serde(default = "ModelManifest::default_name")]
    pub name: String,
    /// Square input resolution the graph was exported for
    #[serde(default = "ModelManifest::default_input_size")]
    pub input_size: u32,
    /// Class names indexed by label value (index 0 = background)
    #[serde(default)]
    pub labels: Vec<String>,
}

impl ModelManifest {
    fn default_name() -> String {
        "deeplabv3-ade20k".to_string()
    }

    fn default_input_size() -> u32 {
        crate::config::DEFAULT_INFERENCE_SIZE
    }

    /// Human-readable class name for a label value
    #[must_use]
    pub fn label_name(&self, label: u32) -> Option<&str> {
        self.labels.get(label as usize).map(String::as_str)
    }
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
            input_size: Self::default_input_size(),
            labels: Vec::new(),
        }
    }
}

/// Resolved, validated model asset directory
#[derive(Debug, Clone)]
pub struct ModelAssets {
    dir: PathBuf,
    manifest: ModelManifest,
}

impl ModelAssets {
    /// Resolve and validate a model directory
    ///
    /// # Errors
    /// - `ModelLoad` when the directory or `model.onnx` is missing
    /// - `ModelLoad` when `config.json` exists but cannot be parsed
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();

        if !dir.is_dir() {
            return Err(EditError::model_error_with_context(
                "locate",
                &dir,
                "model directory does not exist",
                &["run `maskedit download-model`", "set MASKEDIT_MODEL_DIR"],
            ));
        }

        let model_path = dir.join(MODEL_FILE);
        if !model_path.is_file() {
            return Err(EditError::model_error_with_context(
                "locate",
                &model_path,
                "model file not found",
                &["run `maskedit download-model`"],
            ));
        }

        let manifest = Self::read_manifest(&dir)?;
        log::debug!(
            "Resolved model '{}' at {} (input {}x{}, {} class names)",
            manifest.name,
            dir.display(),
            manifest.input_size,
            manifest.input_size,
            manifest.labels.len()
        );

        Ok(Self { dir, manifest })
    }

    fn read_manifest(dir: &Path) -> Result<ModelManifest> {
        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Ok(ModelManifest::default());
        }

        let content = fs::read_to_string(&manifest_path).map_err(|e| {
            EditError::model_error_with_context("read manifest of", &manifest_path, &e.to_string(), &[])
        })?;
        serde_json::from_str(&content).map_err(|e| {
            EditError::model_error_with_context(
                "parse manifest of",
                &manifest_path,
                &e.to_string(),
                &["check config.json is valid JSON"],
            )
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn model_path(&self) -> PathBuf {
        self.dir.join(MODEL_FILE)
    }

    #[must_use]
    pub fn manifest(&self) -> &ModelManifest {
        &self.manifest
    }

    /// Read the raw graph bytes
    ///
    /// # Errors
    /// - `ModelLoad` on I/O failure
    pub fn load_model_data(&self) -> Result<Vec<u8>> {
        let path = self.model_path();
        fs::read(&path)
            .map_err(|e| EditError::model_error_with_context("read", &path, &e.to_string(), &[]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_directory_is_model_load_error() {
        let err = ModelAssets::open("/definitely/not/a/model/dir").unwrap_err();
        assert!(matches!(err, EditError::ModelLoad(_)));
    }

    #[test]
    fn test_missing_model_file_is_model_load_error() {
        let dir = TempDir::new().unwrap();
        let err = ModelAssets::open(dir.path()).unwrap_err();
        assert!(matches!(err, EditError::ModelLoad(_)));
        assert!(err.to_string().contains("model.onnx"));
    }

    #[test]
    fn test_manifest_defaults_and_parsing() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(MODEL_FILE), b"graph").unwrap();

        let assets = ModelAssets::open(dir.path()).unwrap();
        assert_eq!(assets.manifest(), &ModelManifest::default());
        assert_eq!(assets.load_model_data().unwrap(), b"graph");

        fs::write(
            dir.path().join(MANIFEST_FILE),
            r#"{"name": "tiny", "input_size": 257, "labels": ["background", "wall"]}"#,
        )
        .unwrap();
        let assets = ModelAssets::open(dir.path()).unwrap();
        assert_eq!(assets.manifest().input_size, 257);
        assert_eq!(assets.manifest().label_name(1), Some("wall"));
        assert_eq!(assets.manifest().label_name(9), None);
    }

    #[test]
    fn test_corrupt_manifest_is_model_load_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(MODEL_FILE), b"graph").unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), b"{ not json").unwrap();
        let err = ModelAssets::open(dir.path()).unwrap_err();
        assert!(matches!(err, EditError::ModelLoad(_)));
    }
}
