//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use image::{ImageFormat, Rgb, RgbImage};
use maskedit::{
    EditConfig, EditError, EditOrchestrator, EditRequest, EditResult, EditService,
    GeneratedImage, MemoryScratchStorage, MockModelLoader, MockSegmentationModel, Result,
    SegmentationAdapter,
};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const RESULT_URL: &str = "https://images.example.com/generated/0.png";

/// Encode a solid-colour RGB image as PNG
pub fn solid_png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    encode(&RgbImage::from_pixel(width, height, Rgb(color)), ImageFormat::Png)
}

/// Encode a solid-colour RGB image as JPEG
pub fn solid_jpeg(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    encode(&RgbImage::from_pixel(width, height, Rgb(color)), ImageFormat::Jpeg)
}

/// Encode a PNG whose columns left of `split_x` are `left` and the rest `right`
pub fn two_tone_png(width: u32, height: u32, split_x: u32, left: [u8; 3], right: [u8; 3]) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, _| {
        if x < split_x {
            Rgb(left)
        } else {
            Rgb(right)
        }
    });
    encode(&image, ImageFormat::Png)
}

fn encode(image: &RgbImage, format: ImageFormat) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, format).unwrap();
    buffer.into_inner()
}

/// Edit service that records what it receives
#[derive(Default)]
pub struct RecordingEditService {
    calls: AtomicUsize,
    requests: Mutex<Vec<EditRequest>>,
    delay: Option<Duration>,
    failure: Option<u16>,
}

impl RecordingEditService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer only after `delay`
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Answer every call with the given HTTP status
    pub fn failing(status: u16) -> Self {
        Self {
            failure: Some(status),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<EditRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl EditService for RecordingEditService {
    async fn submit(&self, request: &EditRequest) -> Result<EditResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(status) = self.failure {
            return Err(EditError::remote(status, "upstream failure"));
        }
        Ok(EditResult {
            created: None,
            images: (0..request.variant_count)
                .map(|i| GeneratedImage {
                    url: RESULT_URL.replace("0.png", &format!("{i}.png")),
                    revised_prompt: None,
                })
                .collect(),
        })
    }
}

/// Orchestrator wired to in-memory collaborators
pub struct Harness {
    pub orchestrator: Arc<EditOrchestrator>,
    pub loader: Arc<MockModelLoader>,
    pub service: Arc<RecordingEditService>,
    pub scratch: Arc<MemoryScratchStorage>,
}

impl Harness {
    pub fn new(model: MockSegmentationModel, service: RecordingEditService) -> Self {
        Self::with_config(model, service, EditConfig::default())
    }

    pub fn with_config(
        model: MockSegmentationModel,
        service: RecordingEditService,
        config: EditConfig,
    ) -> Self {
        Self::from_loader(MockModelLoader::new(model), service, config)
    }

    pub fn from_loader(
        loader: MockModelLoader,
        service: RecordingEditService,
        config: EditConfig,
    ) -> Self {
        let loader = Arc::new(loader);
        let service = Arc::new(service);
        let scratch = Arc::new(MemoryScratchStorage::new());
        let adapter = Arc::new(SegmentationAdapter::new(
            loader.clone(),
            config.inference_size,
        ));
        let orchestrator = EditOrchestrator::new(config, adapter, service.clone(), scratch.clone())
            .unwrap();
        Self {
            orchestrator: Arc::new(orchestrator),
            loader,
            service,
            scratch,
        }
    }
}
