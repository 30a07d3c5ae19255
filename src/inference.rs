//! Segmentation inference adapter
//!
//! The adapter owns a lazily loaded model shared by every request. Loading is
//! single-flight: concurrent first callers await the same in-flight load, and
//! once loaded the model is used read-only from any number of tasks.

use crate::{
    config::{BackendType, EditConfig},
    error::{EditError, Result},
    resize::CanvasResizer,
    types::LabelGrid,
};
use image::RgbImage;
use instant::Instant;
use ndarray::{Array4, ArrayViewD};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AdapterKey {
    backend: BackendType,
    model_dir: PathBuf,
    input_size: u32,
}

static SHARED_ADAPTERS: OnceLock<Mutex<HashMap<AdapterKey, Arc<SegmentationAdapter>>>> =
    OnceLock::new();

/// A loaded dense-prediction model
pub trait SegmentationModel: Send + Sync {
    /// Display name for logs
    fn name(&self) -> &str;

    /// Run the model on an NHWC `[1, H, W, 3]` integer tensor
    ///
    /// # Errors
    /// - `Inference` on runtime failure or unexpected output shape
    fn predict(&self, input: &Array4<i32>) -> Result<LabelGrid>;

    /// Class name for a label value, when the model ships one
    fn label_name(&self, _label: u32) -> Option<String> {
        None
    }
}

/// Produces a model instance; called at most once per adapter
pub trait ModelLoader: Send + Sync {
    /// Load the model from its assets
    ///
    /// # Errors
    /// - `ModelLoad` when assets are missing or corrupt
    fn load(&self) -> Result<Arc<dyn SegmentationModel>>;

    /// Short description for logs
    fn describe(&self) -> String;
}

/// Create the loader for the configured backend
///
/// # Errors
/// - `InvalidConfig` when the backend was not compiled in
pub fn loader_for(config: &EditConfig) -> Result<Arc<dyn ModelLoader>> {
    match config.backend {
        #[cfg(feature = "tract")]
        BackendType::Tract => Ok(Arc::new(crate::backends::TractModelLoader::new(
            config.model_dir.clone(),
            config.inference_size,
        ))),
        #[cfg(feature = "onnx")]
        BackendType::Onnx => Ok(Arc::new(crate::backends::OnnxModelLoader::new(
            config.model_dir.clone(),
            config.inference_size,
            config.execution_provider,
        ))),
        #[allow(unreachable_patterns)]
        other => Err(EditError::invalid_config(format!(
            "Backend '{other}' is not available in this build. Rebuild with --features {other}"
        ))),
    }
}

/// Single-flight wrapper around a lazily loaded segmentation model
pub struct SegmentationAdapter {
    loader: Arc<dyn ModelLoader>,
    model: OnceCell<Arc<dyn SegmentationModel>>,
    input_size: u32,
}

impl SegmentationAdapter {
    #[must_use]
    pub fn new(loader: Arc<dyn ModelLoader>, input_size: u32) -> Self {
        Self {
            loader,
            model: OnceCell::new(),
            input_size,
        }
    }

    /// Adapter for the backend and model directory in `config`
    ///
    /// # Errors
    /// - `InvalidConfig` when the backend was not compiled in
    pub fn from_config(config: &EditConfig) -> Result<Self> {
        Ok(Self::new(loader_for(config)?, config.inference_size))
    }

    /// Process-wide adapter for `config`
    ///
    /// Configurations naming the same backend, model directory and input size
    /// share one adapter, so the model is loaded once per process.
    ///
    /// # Errors
    /// - `InvalidConfig` when the backend was not compiled in
    pub fn shared(config: &EditConfig) -> Result<Arc<Self>> {
        let key = AdapterKey {
            backend: config.backend,
            model_dir: config.model_dir.clone(),
            input_size: config.inference_size,
        };
        let registry = SHARED_ADAPTERS.get_or_init(|| Mutex::new(HashMap::new()));
        let mut adapters = registry
            .lock()
            .map_err(|_| EditError::internal("Adapter registry lock poisoned"))?;
        if let Some(adapter) = adapters.get(&key) {
            return Ok(Arc::clone(adapter));
        }
        let adapter = Arc::new(Self::from_config(config)?);
        adapters.insert(key, Arc::clone(&adapter));
        Ok(adapter)
    }

    /// Square input size this adapter accepts
    #[must_use]
    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    /// Whether the model has been loaded
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.model.initialized()
    }

    /// Get the shared model, loading it on first use
    ///
    /// A failed load is not cached; the next caller attempts it again.
    ///
    /// # Errors
    /// - `ModelLoad` from the loader
    pub async fn model(&self) -> Result<Arc<dyn SegmentationModel>> {
        let model = self
            .model
            .get_or_try_init(|| async {
                let loader = Arc::clone(&self.loader);
                info!(loader = %loader.describe(), "Loading segmentation model");
                let start = Instant::now();
                let model = tokio::task::spawn_blocking(move || loader.load())
                    .await
                    .map_err(|e| EditError::internal(format!("Model load task failed: {e}")))??;
                info!(
                    model = %model.name(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Segmentation model loaded"
                );
                Ok::<_, EditError>(model)
            })
            .await?;
        Ok(Arc::clone(model))
    }

    /// Classify every pixel of an RGB image at the model resolution
    ///
    /// # Errors
    /// - `Inference` when the image is not `input_size x input_size`
    /// - `ModelLoad` when the model cannot be loaded
    /// - `Inference` when the forward pass fails or returns a differently sized grid
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub async fn classify(&self, image: &RgbImage) -> Result<LabelGrid> {
        let expected = (self.input_size, self.input_size);
        if image.dimensions() != expected {
            return Err(EditError::inference(format!(
                "Expected {}x{} input, got {}x{}",
                expected.0,
                expected.1,
                image.width(),
                image.height()
            )));
        }

        let model = self.model().await?;
        let tensor = CanvasResizer::to_rgb_tensor(image);

        let start = Instant::now();
        let worker_model = Arc::clone(&model);
        let grid = tokio::task::spawn_blocking(move || worker_model.predict(&tensor))
            .await
            .map_err(|e| EditError::internal(format!("Inference task failed: {e}")))??;

        if grid.dimensions() != expected {
            return Err(EditError::inference(format!(
                "Model returned a {}x{} label grid for {}x{} input",
                grid.width(),
                grid.height(),
                expected.0,
                expected.1
            )));
        }

        let distinct = grid.distinct_labels();
        debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            distinct = ?distinct,
            names = ?distinct
                .iter()
                .filter_map(|label| model.label_name(*label))
                .collect::<Vec<_>>(),
            "Segmentation labels"
        );

        Ok(grid)
    }
}

/// Convert a dense label output of shape `[H, W]`, `[1, H, W]` or `[1, H, W, 1]`
///
/// # Errors
/// - `Inference` on any other shape or on negative labels
pub fn labels_from_view(view: &ArrayViewD<'_, i64>) -> Result<LabelGrid> {
    let shape = view.shape();
    let (height, width) = match *shape {
        [h, w] | [1, h, w] | [1, h, w, 1] => (h, w),
        _ => {
            return Err(EditError::inference(format!(
                "Unexpected label output shape {shape:?}"
            )))
        },
    };

    let labels = view
        .iter()
        .map(|&value| {
            u32::try_from(value).map_err(|_| {
                EditError::inference(format!("Model produced invalid label value {value}"))
            })
        })
        .collect::<Result<Vec<u32>>>()?;

    LabelGrid::new(width as u32, height as u32, labels)
}
