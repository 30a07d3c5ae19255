//! End-to-end pipeline behaviour against in-memory collaborators

mod fixtures;

use fixtures::{solid_jpeg, solid_png, two_tone_png, Harness, RecordingEditService, RESULT_URL};
use image::GenericImageView;
use maskedit::{
    CanvasParams, CanvasResizer, EditConfig, EditError, EditStage, ImageInput, ImageSource,
    LabelGrid, MaskSynthesizer, MockModelLoader, MockSegmentationModel,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn small_photo_yields_matching_canvas_and_mask() {
    let harness = Harness::new(MockSegmentationModel::non_black(7), RecordingEditService::new());

    let outcome = harness
        .orchestrator
        .request_edit(
            ImageSource::Bytes(solid_jpeg(300, 200, [120, 140, 160])),
            "turn the wall blue",
        )
        .await
        .unwrap();

    assert_eq!(outcome.url(), RESULT_URL);
    assert_eq!(outcome.source_dimensions, (300, 200));
    assert_eq!(outcome.mask.dimensions(), (1024, 1024));

    let requests = harness.service.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.dimensions, (1024, 1024));
    assert_eq!(request.size_param(), "1024x1024");
    assert_eq!(request.prompt, "turn the wall blue");
    assert_eq!(request.variant_count, 1);

    let image = image::load_from_memory(&request.image_png).unwrap();
    let mask = image::load_from_memory(&request.mask_png).unwrap();
    assert_eq!(image.dimensions(), (1024, 1024));
    assert_eq!(mask.dimensions(), (1024, 1024));

    // The photo is centred without enlargement at x 362..662, y 412..612
    assert_eq!(mask.get_pixel(512, 512).0[3], 255);
    assert_eq!(mask.get_pixel(0, 0).0, [255, 255, 255, 0]);
    assert_eq!(mask.get_pixel(300, 512).0[3], 0);
    assert_eq!(mask.get_pixel(512, 380).0[3], 0);
    assert_eq!(image.get_pixel(0, 0).0[3], 0);
    assert_eq!(image.get_pixel(512, 512).0[3], 255);

    assert_eq!(harness.loader.load_count(), 1);
    assert!(harness.scratch.is_empty());
}

const WARM: [u8; 3] = [220, 40, 40];
const COOL: [u8; 3] = [40, 40, 220];

/// Labels warm pixels 1, cool pixels 2 and black padding 0
fn warm_cool_model() -> MockSegmentationModel {
    MockSegmentationModel::from_fn(|_, _, rgb| match rgb {
        [0, 0, 0] => 0,
        [r, _, b] if r > b => 1,
        _ => 2,
    })
}

#[tokio::test]
async fn mask_lines_up_with_submitted_image() {
    // Smaller than the inference canvas, between the two canvases, larger than both
    for (width, height) in [(300, 200), (800, 600), (2000, 1000)] {
        let harness = Harness::new(warm_cool_model(), RecordingEditService::new());
        harness
            .orchestrator
            .request_edit(
                ImageSource::Bytes(two_tone_png(width, height, width / 4, WARM, COOL)),
                "repaint the facade",
            )
            .await
            .unwrap();

        let request = &harness.service.requests()[0];
        let image = image::load_from_memory(&request.image_png).unwrap().to_rgba8();
        let mask = image::load_from_memory(&request.mask_png).unwrap().to_rgba8();
        assert_eq!(image.dimensions(), mask.dimensions());

        let (fit_w, fit_h) =
            CanvasResizer::fit_dimensions(width, height, &CanvasParams::new(1024));
        let footprint = (fit_w * fit_h) as usize;

        let mut opaque = 0;
        let mut editable = 0;
        let mut editable_on_padding = 0;
        let mut wrong_region = 0;
        for (source, selected) in image.pixels().zip(mask.pixels()) {
            if source.0[3] == 255 {
                opaque += 1;
            }
            if selected.0[3] != 255 {
                continue;
            }
            editable += 1;
            if source.0[3] != 255 {
                editable_on_padding += 1;
                continue;
            }
            // Label 1 of 2 renders as 127, label 2 as 255
            let expected = if source.0[0] > source.0[2] { 127 } else { 255 };
            if selected.0[0] != expected {
                wrong_region += 1;
            }
        }

        let case = format!("{width}x{height}");
        assert_eq!(opaque, footprint, "{case}");
        assert_eq!(editable_on_padding, 0, "{case}");
        // Nearest-neighbour stretch may shave a couple of pixels off each edge
        let border = 6 * (fit_w + fit_h) as usize;
        assert!(editable <= footprint, "{case}");
        assert!(footprint - editable <= border, "{case}: {editable} of {footprint}");
        assert!(wrong_region <= 6 * fit_h as usize, "{case}: {wrong_region} misplaced");
    }
}

#[test]
fn label_grid_maps_to_documented_pixels() {
    let grid = LabelGrid::from_rows(&[vec![0, 0], vec![0, 5]]).unwrap();
    let mask = MaskSynthesizer::synthesize(&grid, 2, 2).unwrap();

    assert_eq!(mask.image.get_pixel(1, 1).0, [255, 255, 255, 255]);
    for (x, y) in [(0, 0), (0, 1), (1, 0)] {
        assert_eq!(mask.image.get_pixel(x, y).0, [255, 255, 255, 0]);
    }
    assert_eq!(mask.labels, grid);
}

#[tokio::test]
async fn missing_input_fails_before_any_work() {
    let harness = Harness::new(MockSegmentationModel::constant(1), RecordingEditService::new());

    let err = harness
        .orchestrator
        .request_edit_from(ImageInput::default(), "remove the car")
        .await
        .unwrap_err();

    assert!(matches!(err, EditError::NoInputProvided));
    assert_eq!(harness.loader.load_count(), 0);
    assert_eq!(harness.service.calls(), 0);
    assert!(harness.scratch.is_empty());
}

#[tokio::test]
async fn mismatched_mask_is_never_submitted() {
    let harness = Harness::new(MockSegmentationModel::constant(3), RecordingEditService::new());

    let mut prepared = harness
        .orchestrator
        .prepare(ImageSource::Bytes(solid_png(64, 48, [10, 200, 30])))
        .await
        .unwrap();
    assert_eq!(prepared.edit_dimensions, (1024, 1024));
    assert_eq!(harness.scratch.len(), 2);

    let grid = LabelGrid::from_rows(&[vec![0, 1], vec![1, 0]]).unwrap();
    prepared.mask = MaskSynthesizer::synthesize(&grid, 512, 512).unwrap();

    let err = harness
        .orchestrator
        .submit_prepared(prepared, "add a window")
        .await
        .unwrap_err();

    match err {
        EditError::DimensionMismatch {
            source_dims,
            mask_dims,
        } => {
            assert_eq!(source_dims, (1024, 1024));
            assert_eq!(mask_dims, (512, 512));
        },
        other => panic!("expected DimensionMismatch, got {other:?}"),
    }
    assert_eq!(harness.service.calls(), 0);
    assert!(harness.scratch.is_empty());
}

#[tokio::test]
async fn blank_prompt_is_rejected_up_front() {
    let harness = Harness::new(MockSegmentationModel::constant(1), RecordingEditService::new());

    let err = harness
        .orchestrator
        .request_edit(ImageSource::Bytes(solid_png(8, 8, [1, 2, 3])), "   ")
        .await
        .unwrap_err();

    assert!(matches!(err, EditError::InvalidConfig(_)));
    assert_eq!(harness.loader.load_count(), 0);
    assert_eq!(harness.service.calls(), 0);
}

#[tokio::test]
async fn concurrent_requests_share_one_model_load() {
    let loader = MockModelLoader::new(MockSegmentationModel::constant(2)).with_load_delay_ms(50);
    let harness = Harness::from_loader(loader, RecordingEditService::new(), EditConfig::default());

    let tasks = (0..4).map(|i| {
        let orchestrator = Arc::clone(&harness.orchestrator);
        tokio::spawn(async move {
            orchestrator
                .request_edit(
                    ImageSource::Bytes(solid_png(40 + i, 30, [200, 10, 10])),
                    "make it night",
                )
                .await
        })
    });

    for result in futures::future::join_all(tasks).await {
        assert_eq!(result.unwrap().unwrap().url(), RESULT_URL);
    }
    assert_eq!(harness.loader.load_count(), 1);
    assert_eq!(harness.loader.model().call_count(), 4);
    assert_eq!(harness.service.calls(), 4);
    assert!(harness.scratch.is_empty());
}

#[tokio::test]
async fn slow_service_hits_submit_deadline() {
    let config = EditConfig::builder()
        .submit_timeout(Duration::from_millis(50))
        .build()
        .unwrap();
    let harness = Harness::with_config(
        MockSegmentationModel::constant(1),
        RecordingEditService::slow(Duration::from_secs(5)),
        config,
    );

    let err = harness
        .orchestrator
        .request_edit(ImageSource::Bytes(solid_png(16, 16, [9, 9, 9])), "add snow")
        .await
        .unwrap_err();

    match err {
        EditError::Timeout { stage, after } => {
            assert_eq!(stage, EditStage::Submit.to_string());
            assert_eq!(after, Duration::from_millis(50));
        },
        other => panic!("expected Timeout, got {other:?}"),
    }
    assert_eq!(harness.service.calls(), 1);
    assert!(harness.scratch.is_empty());
}

#[tokio::test]
async fn inference_failure_propagates_and_cleans_up() {
    let harness = Harness::new(
        MockSegmentationModel::failing("tensor shape rejected"),
        RecordingEditService::new(),
    );

    let err = harness
        .orchestrator
        .request_edit(ImageSource::Bytes(solid_png(20, 20, [50, 50, 50])), "add a cat")
        .await
        .unwrap_err();

    assert!(matches!(err, EditError::Inference(ref msg) if msg.contains("tensor shape rejected")));
    assert_eq!(harness.service.calls(), 0);
    assert!(harness.scratch.is_empty());
}

#[tokio::test]
async fn remote_failure_is_surfaced_unchanged() {
    let harness = Harness::new(MockSegmentationModel::constant(1), RecordingEditService::failing(400));

    let err = harness
        .orchestrator
        .request_edit(ImageSource::Bytes(solid_png(20, 20, [50, 50, 50])), "add a cat")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EditError::RemoteService {
            status: 400,
            retryable: false,
            ..
        }
    ));
    // Default policy submits at most once
    assert_eq!(harness.service.calls(), 1);
}

#[tokio::test]
async fn undecodable_source_is_a_decode_error() {
    let harness = Harness::new(MockSegmentationModel::constant(1), RecordingEditService::new());

    let err = harness
        .orchestrator
        .request_edit(ImageSource::Bytes(b"not an image".to_vec()), "add a cat")
        .await
        .unwrap_err();

    assert!(matches!(err, EditError::Decode(_)));
    assert_eq!(harness.loader.load_count(), 0);
}

#[tokio::test]
async fn path_source_reads_from_disk() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("kitchen.png");
    std::fs::write(&path, solid_png(120, 90, [70, 80, 90])).unwrap();

    let harness = Harness::new(MockSegmentationModel::constant(4), RecordingEditService::new());
    let outcome = harness
        .orchestrator
        .request_edit_from(ImageInput::default().with_path(&path), "marble counters")
        .await
        .unwrap();
    assert_eq!(outcome.source_dimensions, (120, 90));
    assert_eq!(outcome.mask.max_label(), Some(4));

    let err = harness
        .orchestrator
        .request_edit(ImageSource::Path(dir.path().join("missing.png")), "marble counters")
        .await
        .unwrap_err();
    assert!(matches!(err, EditError::Io(_)));
}

#[tokio::test]
async fn requested_variants_and_prompt_are_forwarded_as_given() {
    let config = EditConfig::builder().variant_count(3).build().unwrap();
    let harness = Harness::with_config(
        MockSegmentationModel::constant(1),
        RecordingEditService::new(),
        config,
    );

    let outcome = harness
        .orchestrator
        .request_edit(ImageSource::Bytes(solid_png(10, 10, [1, 1, 1])), "  neon sign  ")
        .await
        .unwrap();

    assert_eq!(outcome.result.images.len(), 3);
    assert_eq!(outcome.url(), RESULT_URL);
    let request = &harness.service.requests()[0];
    assert_eq!(request.variant_count, 3);
    assert_eq!(request.prompt, "  neon sign  ");
    assert!(outcome.timings.stage_ms(EditStage::Submit).is_some());
}
