use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{DynamicImage, Rgb, RgbImage};
use maskedit::{CanvasParams, CanvasResizer, LabelGrid, MaskSynthesizer};

/// Grid with a centred block of class `label` over a background of zeros
fn blob_grid(size: u32, label: u32) -> LabelGrid {
    let quarter = size / 4;
    let labels = (0..size * size)
        .map(|i| {
            let (x, y) = (i % size, i / size);
            let band = quarter..size - quarter;
            if band.contains(&x) && band.contains(&y) {
                label
            } else {
                0
            }
        })
        .collect();
    LabelGrid::new(size, size, labels).unwrap()
}

fn bench_mask_synthesis(c: &mut Criterion) {
    let mut group = c.benchmark_group("mask_synthesis");
    for grid_size in [129_u32, 257, 513] {
        let grid = blob_grid(grid_size, 12);
        group.bench_with_input(
            BenchmarkId::new("synthesize_1024", grid_size),
            &grid,
            |b, grid| b.iter(|| MaskSynthesizer::synthesize(black_box(grid), 1024, 1024)),
        );
    }
    let grid = blob_grid(513, 12);
    group.bench_function("encode_png_1024", |b| {
        let mask = MaskSynthesizer::synthesize(&grid, 1024, 1024).unwrap();
        b.iter(|| black_box(&mask).to_png());
    });
    group.finish();
}

fn bench_canvas_resize(c: &mut Criterion) {
    let mut group = c.benchmark_group("canvas_resize");
    for (width, height) in [(300_u32, 200_u32), (1920, 1080), (4032, 3024)] {
        let photo =
            DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([90, 120, 150])));
        for target in [513_u32, 1024] {
            let params = CanvasParams::new(target);
            group.bench_with_input(
                BenchmarkId::new(format!("{width}x{height}"), target),
                &params,
                |b, params| b.iter(|| CanvasResizer::resize_image(black_box(&photo), params)),
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_mask_synthesis, bench_canvas_resize);
criterion_main!(benches);
