//! Canvas-fit resizing
//!
//! Fits an arbitrary raster image into a square canvas with "contain"
//! semantics: aspect ratio is preserved, the scaled image is centered and the
//! rest of the canvas is fully transparent black. The output always carries an
//! explicit alpha channel.

use crate::{
    error::{EditError, Result},
    types::{encode_png, CanvasParams},
};
use image::{imageops, DynamicImage, RgbImage, Rgba, RgbaImage};
use ndarray::Array4;

/// Transparent black used for every pixel not covered by the source
const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Canvas-fit resizer
pub struct CanvasResizer;

impl CanvasResizer {
    /// Resize encoded image bytes onto a `target_size` square canvas
    ///
    /// Returns PNG-encoded RGBA bytes of exactly `target_size x target_size`.
    ///
    /// # Errors
    /// - `InvalidDimension` when `target_size` is zero
    /// - `Decode` when the bytes are not a supported raster image
    pub fn resize(bytes: &[u8], target_size: u32) -> Result<Vec<u8>> {
        let canvas = Self::resize_bytes(bytes, &CanvasParams::new(target_size))?;
        encode_png(&canvas)
    }

    /// Decode and fit image bytes, returning the raw RGBA canvas
    ///
    /// # Errors
    /// - `InvalidDimension` when the canvas size is zero
    /// - `Decode` when the bytes are not a supported raster image
    pub fn resize_bytes(bytes: &[u8], params: &CanvasParams) -> Result<RgbaImage> {
        Self::validate(params)?;
        let image = Self::decode(bytes)?;
        Self::resize_image(&image, params)
    }

    /// Decode raster bytes in any enabled format
    ///
    /// # Errors
    /// - `Decode` for empty, truncated or unrecognized input
    pub fn decode(bytes: &[u8]) -> Result<DynamicImage> {
        if bytes.is_empty() {
            return Err(EditError::decode("Image buffer is empty"));
        }
        image::load_from_memory(bytes)
            .map_err(|e| EditError::decode(format!("Failed to decode image from bytes: {e}")))
    }

    /// Fit a decoded image onto a square transparent canvas
    ///
    /// # Errors
    /// - `InvalidDimension` when the canvas size is zero or the source has no pixels
    pub fn resize_image(image: &DynamicImage, params: &CanvasParams) -> Result<RgbaImage> {
        Self::validate(params)?;
        let rgba = image.to_rgba8();
        let (orig_width, orig_height) = rgba.dimensions();
        if orig_width == 0 || orig_height == 0 {
            return Err(EditError::invalid_dimension(format!(
                "Source image has no pixels ({orig_width}x{orig_height})"
            )));
        }

        let (new_width, new_height) = Self::fit_dimensions(orig_width, orig_height, params);
        let target_size = params.size;

        // Unit scale copies the source untouched so re-fitting a canvas is a no-op
        let scaled = if (new_width, new_height) == (orig_width, orig_height) {
            rgba
        } else {
            imageops::resize(&rgba, new_width, new_height, imageops::FilterType::Triangle)
        };

        let mut canvas = RgbaImage::from_pixel(target_size, target_size, TRANSPARENT);
        let offset_x = (target_size - new_width) / 2;
        let offset_y = (target_size - new_height) / 2;
        imageops::replace(&mut canvas, &scaled, i64::from(offset_x), i64::from(offset_y));

        log::debug!(
            "Fitted {}x{} into {}x{} canvas (scaled to {}x{}, offset {},{})",
            orig_width,
            orig_height,
            target_size,
            target_size,
            new_width,
            new_height,
            offset_x,
            offset_y
        );

        Ok(canvas)
    }

    /// Dimensions of the scaled source inside the canvas
    ///
    /// The scale is the largest factor that fits the longer side within the
    /// canvas, capped at `size / layout_size` (1 for a plain canvas) unless
    /// `enlarge` is set. Results are clamped to `1..=size` so that extreme
    /// aspect ratios never collapse to zero.
    #[must_use]
    pub fn fit_dimensions(width: u32, height: u32, params: &CanvasParams) -> (u32, u32) {
        let size = f64::from(params.size);
        let mut scale = (size / f64::from(width)).min(size / f64::from(height));
        if !params.enlarge {
            scale = scale.min(size / f64::from(params.layout_size()));
        }

        let scaled = |dim: u32| -> u32 {
            let value = (f64::from(dim) * scale).round();
            (value as u32).clamp(1, params.size)
        };
        (scaled(width), scaled(height))
    }

    /// Drop the alpha channel, keeping the RGB of transparent padding (black)
    #[must_use]
    pub fn to_rgb(image: &RgbaImage) -> RgbImage {
        DynamicImage::ImageRgba8(image.clone()).to_rgb8()
    }

    /// Convert an RGB image to the NHWC integer tensor `[1, H, W, 3]`
    #[must_use]
    pub fn to_rgb_tensor(image: &RgbImage) -> Array4<i32> {
        let (width, height) = image.dimensions();
        Array4::from_shape_fn((1, height as usize, width as usize, 3), |(_, y, x, c)| {
            i32::from(image.get_pixel(x as u32, y as u32).0[c])
        })
    }

    fn validate(params: &CanvasParams) -> Result<()> {
        if params.size == 0 {
            return Err(EditError::invalid_dimension(
                "Target canvas size must be greater than 0",
            ));
        }
        Ok(())
    }
}
