//! Tract backend for segmentation models
//!
//! Runs the exported graph with Tract, a pure Rust inference library, so the
//! default build needs no native runtime. The graph takes an NHWC integer
//! image and produces one class label per pixel.

use crate::{
    error::{EditError, Result},
    inference::{labels_from_view, ModelLoader, SegmentationModel},
    models::{ModelAssets, ModelManifest},
    types::LabelGrid,
};
use instant::Instant;
use ndarray::Array4;
use std::path::PathBuf;
use std::sync::Arc;
use tract_onnx::prelude::*;

/// Type alias for the complex Tract model type to reduce complexity warnings
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Loads a segmentation graph from a model directory with Tract
#[derive(Debug, Clone)]
pub struct TractModelLoader {
    model_dir: PathBuf,
    input_size: u32,
}

impl TractModelLoader {
    #[must_use]
    pub fn new(model_dir: PathBuf, input_size: u32) -> Self {
        Self {
            model_dir,
            input_size,
        }
    }

    fn build_plan(&self, model_data: Vec<u8>) -> Result<TractModel> {
        let size = self.input_size as usize;
        onnx()
            .model_for_read(&mut std::io::Cursor::new(model_data))
            .map_err(|e| EditError::model_load(format!("Failed to load ONNX model: {e}")))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(i32::datum_type(), tvec!(1, size, size, 3)),
            )
            .map_err(|e| EditError::model_load(format!("Failed to set input shape: {e}")))?
            .into_optimized()
            .map_err(|e| EditError::model_load(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| EditError::model_load(format!("Failed to create runnable model: {e}")))
    }
}

impl ModelLoader for TractModelLoader {
    fn load(&self) -> Result<Arc<dyn SegmentationModel>> {
        let start = Instant::now();
        let assets = ModelAssets::open(&self.model_dir)?;
        let manifest = assets.manifest().clone();

        if manifest.input_size != self.input_size {
            log::warn!(
                "Model '{}' was exported for {}x{} input, running at {}x{}",
                manifest.name,
                manifest.input_size,
                manifest.input_size,
                self.input_size,
                self.input_size
            );
        }

        let model_data = assets.load_model_data()?;
        #[allow(clippy::cast_precision_loss)]
        let size_mb = model_data.len() as f64 / (1024.0 * 1024.0);
        log::info!("Initializing Tract backend for '{}' ({size_mb:.2} MB)", manifest.name);

        let plan = self.build_plan(model_data)?;
        log::info!(
            "Tract backend initialized in {}ms",
            start.elapsed().as_millis()
        );

        Ok(Arc::new(TractSegmentationModel { plan, manifest }))
    }

    fn describe(&self) -> String {
        format!("tract:{}", self.model_dir.display())
    }
}

/// Segmentation graph compiled by Tract
#[derive(Debug)]
pub struct TractSegmentationModel {
    plan: TractModel,
    manifest: ModelManifest,
}

impl SegmentationModel for TractSegmentationModel {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    fn predict(&self, input: &Array4<i32>) -> Result<LabelGrid> {
        log::debug!("Running Tract inference on {:?}", input.shape());
        let start = Instant::now();

        let outputs = self
            .plan
            .run(tvec![Tensor::from(input.clone()).into()])
            .map_err(|e| EditError::inference(format!("Tract inference failed: {e}")))?;

        let output = outputs
            .into_iter()
            .next()
            .ok_or_else(|| EditError::inference("No output tensor found"))?
            .into_arc_tensor();

        // Exports disagree on int32 vs int64 labels
        let labels = output
            .cast_to::<i64>()
            .map_err(|e| EditError::inference(format!("Label output is not integral: {e}")))?;
        let view = labels
            .to_array_view::<i64>()
            .map_err(|e| EditError::inference(format!("Failed to read output tensor: {e}")))?;
        let grid = labels_from_view(&view)?;

        log::debug!(
            "Tract inference completed in {}ms ({}x{} labels)",
            start.elapsed().as_millis(),
            grid.width(),
            grid.height()
        );
        Ok(grid)
    }

    fn label_name(&self, label: u32) -> Option<String> {
        self.manifest.label_name(label).map(str::to_string)
    }
}

#[cfg(all(test, feature = "tract"))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_model_dir_is_model_load_error() {
        let loader = TractModelLoader::new(PathBuf::from("/no/such/model"), 513);
        let err = loader.load().err().unwrap();
        assert!(matches!(err, EditError::ModelLoad(_)));
    }

    #[test]
    fn test_corrupt_graph_is_model_load_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(crate::models::MODEL_FILE), b"not a protobuf graph").unwrap();
        let loader = TractModelLoader::new(dir.path().to_path_buf(), 513);
        let err = loader.load().err().unwrap();
        assert!(matches!(err, EditError::ModelLoad(_)));
    }

    #[test]
    fn test_describe_names_backend() {
        let loader = TractModelLoader::new(PathBuf::from("/models/deeplab"), 513);
        assert_eq!(loader.describe(), "tract:/models/deeplab");
    }
}
