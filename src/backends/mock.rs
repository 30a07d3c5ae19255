//! Mock segmentation backend for testing
//!
//! Produces deterministic label grids without model files so the pipeline can
//! be exercised end to end. The loader counts how often it was asked to load,
//! which is how tests observe single-flight behaviour.

use crate::{
    error::{EditError, Result},
    inference::{ModelLoader, SegmentationModel},
    types::LabelGrid,
};
use ndarray::Array4;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type LabelFn = dyn Fn(u32, u32, [i32; 3]) -> u32 + Send + Sync;

/// Mock model computing each label from pixel position and color
#[derive(Clone)]
pub struct MockSegmentationModel {
    label_fn: Arc<LabelFn>,
    failure: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl std::fmt::Debug for MockSegmentationModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSegmentationModel")
            .field("failure", &self.failure)
            .field("calls", &self.calls.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl MockSegmentationModel {
    /// Label every pixel with `(x, y, rgb)`
    pub fn from_fn<F>(label_fn: F) -> Self
    where
        F: Fn(u32, u32, [i32; 3]) -> u32 + Send + Sync + 'static,
    {
        Self {
            label_fn: Arc::new(label_fn),
            failure: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Same label for every pixel
    #[must_use]
    pub fn constant(label: u32) -> Self {
        Self::from_fn(move |_, _, _| label)
    }

    /// Label every non-black pixel, i.e. everything except transparent padding
    #[must_use]
    pub fn non_black(label: u32) -> Self {
        Self::from_fn(move |_, _, rgb| if rgb == [0, 0, 0] { 0 } else { label })
    }

    /// Model whose forward pass always fails
    #[must_use]
    pub fn failing(message: &str) -> Self {
        let mut model = Self::constant(0);
        model.failure = Some(message.to_string());
        model
    }

    /// Number of forward passes so far
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SegmentationModel for MockSegmentationModel {
    fn name(&self) -> &str {
        "mock-segmentation"
    }

    fn predict(&self, input: &Array4<i32>) -> Result<LabelGrid> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.failure {
            return Err(EditError::inference(message.clone()));
        }

        let shape = input.shape();
        let (height, width, channels) = match *shape {
            [1, h, w, c] => (h, w, c),
            _ => {
                return Err(EditError::inference(format!(
                    "Mock model expects [1, H, W, 3], got {shape:?}"
                )))
            },
        };
        if channels != 3 {
            return Err(EditError::inference(format!(
                "Mock model expects 3 channels, got {channels}"
            )));
        }

        let mut labels = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                let rgb = [
                    input.get([0, y, x, 0]).copied().unwrap_or(0),
                    input.get([0, y, x, 1]).copied().unwrap_or(0),
                    input.get([0, y, x, 2]).copied().unwrap_or(0),
                ];
                labels.push((self.label_fn)(x as u32, y as u32, rgb));
            }
        }
        LabelGrid::new(width as u32, height as u32, labels)
    }

    fn label_name(&self, label: u32) -> Option<String> {
        Some(format!("mock-class-{label}"))
    }
}

/// Loader handing out a shared mock model
#[derive(Debug)]
pub struct MockModelLoader {
    model: MockSegmentationModel,
    load_failure: Option<String>,
    load_delay_ms: u64,
    loads: AtomicUsize,
}

impl MockModelLoader {
    #[must_use]
    pub fn new(model: MockSegmentationModel) -> Self {
        Self {
            model,
            load_failure: None,
            load_delay_ms: 0,
            loads: AtomicUsize::new(0),
        }
    }

    /// Loader whose every load attempt fails with `ModelLoad`
    #[must_use]
    pub fn failing(message: &str) -> Self {
        let mut loader = Self::new(MockSegmentationModel::constant(0));
        loader.load_failure = Some(message.to_string());
        loader
    }

    /// Sleep inside `load` to widen the window for concurrent first callers
    #[must_use]
    pub fn with_load_delay_ms(mut self, delay_ms: u64) -> Self {
        self.load_delay_ms = delay_ms;
        self
    }

    /// Number of times `load` ran
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Handle to the model, sharing its call counter
    #[must_use]
    pub fn model(&self) -> MockSegmentationModel {
        self.model.clone()
    }
}

impl ModelLoader for MockModelLoader {
    fn load(&self) -> Result<Arc<dyn SegmentationModel>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.load_delay_ms > 0 {
            std::thread::sleep(std::time::Duration::from_millis(self.load_delay_ms));
        }
        if let Some(message) = &self.load_failure {
            return Err(EditError::model_load(message.clone()));
        }
        Ok(Arc::new(self.model.clone()))
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_model_labels_by_color() {
        let model = MockSegmentationModel::non_black(7);
        let mut input = Array4::<i32>::zeros((1, 2, 2, 3));
        input[[0, 1, 0, 0]] = 255;

        let grid = model.predict(&input).unwrap();
        assert_eq!(grid.get(0, 1), Some(7));
        assert_eq!(grid.get(1, 1), Some(0));
        assert_eq!(model.call_count(), 1);
    }

    #[test]
    fn test_mock_model_rejects_bad_shape() {
        let model = MockSegmentationModel::constant(1);
        let err = model.predict(&Array4::<i32>::zeros((1, 2, 2, 4))).unwrap_err();
        assert!(matches!(err, EditError::Inference(_)));
    }

    #[test]
    fn test_failing_loader() {
        let loader = MockModelLoader::failing("corrupt");
        assert!(matches!(loader.load(), Err(EditError::ModelLoad(_))));
        assert_eq!(loader.load_count(), 1);
    }
}
