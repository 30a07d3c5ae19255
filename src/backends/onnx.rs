//! ONNX Runtime backend for segmentation models
//!
//! Provides hardware-accelerated inference through ONNX Runtime with support
//! for multiple execution providers (CPU, CUDA, CoreML).

use crate::{
    config::ExecutionProvider,
    error::{EditError, Result},
    inference::{labels_from_view, ModelLoader, SegmentationModel},
    models::{ModelAssets, ModelManifest},
    types::LabelGrid,
};
use instant::Instant;
use ndarray::{Array4, ArrayD};
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
};
use ort::session::{builder::GraphOptimizationLevel, builder::SessionBuilder, Session};
use ort::value::Value;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Loads a segmentation graph into an ONNX Runtime session
#[derive(Debug, Clone)]
pub struct OnnxModelLoader {
    model_dir: PathBuf,
    input_size: u32,
    execution_provider: ExecutionProvider,
}

impl OnnxModelLoader {
    #[must_use]
    pub fn new(model_dir: PathBuf, input_size: u32, execution_provider: ExecutionProvider) -> Self {
        Self {
            model_dir,
            input_size,
            execution_provider,
        }
    }

    /// List ONNX Runtime execution providers with availability status
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        let cuda = OrtExecutionProvider::is_available(&CUDAExecutionProvider::default())
            .unwrap_or(false);
        let coreml = OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default())
            .unwrap_or(false);
        vec![
            ("CPU".to_string(), true, "Always available".to_string()),
            ("CUDA".to_string(), cuda, "NVIDIA GPU acceleration".to_string()),
            ("CoreML".to_string(), coreml, "Apple Silicon acceleration".to_string()),
        ]
    }

    fn with_providers(&self, builder: SessionBuilder) -> Result<SessionBuilder> {
        let cuda = CUDAExecutionProvider::default();
        let coreml = CoreMLExecutionProvider::default().with_subgraphs(true);
        let cuda_available = OrtExecutionProvider::is_available(&cuda).unwrap_or(false);
        let coreml_available = OrtExecutionProvider::is_available(&coreml).unwrap_or(false);

        let providers = match self.execution_provider {
            ExecutionProvider::Cpu => Vec::new(),
            ExecutionProvider::Auto => {
                let mut providers = Vec::new();
                if cuda_available {
                    providers.push(cuda.build());
                }
                if coreml_available {
                    providers.push(coreml.build());
                }
                if providers.is_empty() {
                    log::info!("No hardware acceleration available, using CPU");
                }
                providers
            },
            ExecutionProvider::Cuda if cuda_available => vec![cuda.build()],
            ExecutionProvider::CoreMl if coreml_available => vec![coreml.build()],
            requested => {
                log::warn!("{requested:?} execution provider requested but not available, falling back to CPU");
                Vec::new()
            },
        };

        if providers.is_empty() {
            return Ok(builder);
        }
        log::info!("Hardware acceleration enabled with {} provider(s)", providers.len());
        builder
            .with_execution_providers(providers)
            .map_err(|e| EditError::model_load(format!("Failed to set execution providers: {e}")))
    }
}

impl ModelLoader for OnnxModelLoader {
    fn load(&self) -> Result<Arc<dyn SegmentationModel>> {
        let start = Instant::now();
        let assets = ModelAssets::open(&self.model_dir)?;
        let manifest = assets.manifest().clone();
        let model_data = assets.load_model_data()?;

        log::info!(
            "Initializing ONNX Runtime backend for '{}' ({:?})",
            manifest.name,
            self.execution_provider
        );

        let builder = Session::builder()
            .map_err(|e| EditError::model_load(format!("Failed to create session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| EditError::model_load(format!("Failed to set optimization level: {e}")))?;

        let threads = std::thread::available_parallelism()
            .map(std::num::NonZero::get)
            .unwrap_or(4);
        let session = self
            .with_providers(builder)?
            .with_intra_threads(threads)
            .map_err(|e| EditError::model_load(format!("Failed to set intra threads: {e}")))?
            .commit_from_memory(&model_data)
            .map_err(|e| {
                EditError::model_load(format!("Failed to create session from model data: {e}"))
            })?;

        log::info!(
            "ONNX Runtime backend initialized in {}ms",
            start.elapsed().as_millis()
        );

        Ok(Arc::new(OnnxSegmentationModel {
            session: Mutex::new(session),
            manifest,
        }))
    }

    fn describe(&self) -> String {
        format!("onnx:{}", self.model_dir.display())
    }
}

/// Segmentation graph running in an ONNX Runtime session
///
/// `Session::run` needs exclusive access, so forward passes are serialized.
#[derive(Debug)]
pub struct OnnxSegmentationModel {
    session: Mutex<Session>,
    manifest: ModelManifest,
}

impl SegmentationModel for OnnxSegmentationModel {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    fn predict(&self, input: &Array4<i32>) -> Result<LabelGrid> {
        let start = Instant::now();
        let input_value = Value::from_array(input.clone())
            .map_err(|e| EditError::inference(format!("Failed to convert input tensor: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| EditError::internal("ONNX session lock poisoned"))?;
        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| EditError::inference(format!("ONNX inference failed: {e}")))?;

        let first_key = outputs
            .keys()
            .next()
            .ok_or_else(|| EditError::inference("No output tensors found"))?;
        let output = outputs
            .get(first_key)
            .ok_or_else(|| EditError::inference("First output tensor not found"))?;

        let labels: ArrayD<i64> = match output.try_extract_array::<i64>() {
            Ok(view) => view.to_owned(),
            Err(_) => output
                .try_extract_array::<i32>()
                .map_err(|e| {
                    EditError::inference(format!("Failed to extract label tensor: {e}"))
                })?
                .mapv(i64::from),
        };
        let grid = labels_from_view(&labels.view())?;

        log::debug!("ONNX inference completed in {}ms", start.elapsed().as_millis());
        Ok(grid)
    }

    fn label_name(&self, label: u32) -> Option<String> {
        self.manifest.label_name(label).map(str::to_string)
    }
}

#[cfg(all(test, feature = "onnx"))]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_provider_always_listed() {
        let providers = OnnxModelLoader::list_providers();
        assert!(providers.iter().any(|(name, available, _)| name == "CPU" && *available));
    }

    #[test]
    fn test_missing_model_dir_is_model_load_error() {
        let loader = OnnxModelLoader::new(PathBuf::from("/no/such/model"), 513, ExecutionProvider::Cpu);
        assert!(matches!(loader.load(), Err(EditError::ModelLoad(_))));
    }
}
