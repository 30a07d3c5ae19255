//! Mask synthesis from semantic label grids
//!
//! Turns a per-pixel label grid into the RGBA selection mask the edit service
//! expects. Label `0` is background and is preserved; every other label is
//! foreground and may be regenerated, whichever class it names. The RGB
//! channels carry the label normalized against the largest label present,
//! which is recomputed per image rather than taken from a fixed palette.

use crate::{
    error::{EditError, Result},
    types::{LabelGrid, Mask},
};
use image::{imageops, Rgba, RgbaImage};
use tracing::{debug, instrument};

/// Alpha for pixels the edit service must leave untouched
pub const PRESERVE_ALPHA: u8 = 0;

/// Alpha for pixels the edit service may regenerate
pub const EDITABLE_ALPHA: u8 = 255;

/// Grayscale intensity rendered for background pixels
const BACKGROUND_INTENSITY: u8 = 255;

/// Converts label grids into edit masks
pub struct MaskSynthesizer;

impl MaskSynthesizer {
    /// Build a mask of exactly `output_width x output_height` from `grid`
    ///
    /// The grid is rendered at its native size and then stretched (not
    /// letterboxed) with nearest-neighbour sampling, so alpha stays binary.
    ///
    /// # Errors
    /// - `EmptyGrid` when the grid has zero area
    /// - `InvalidDimension` when either output dimension is zero
    #[instrument(skip(grid), fields(grid_width = grid.width(), grid_height = grid.height()))]
    pub fn synthesize(grid: &LabelGrid, output_width: u32, output_height: u32) -> Result<Mask> {
        if grid.is_empty() {
            return Err(EditError::EmptyGrid {
                width: grid.width(),
                height: grid.height(),
            });
        }
        if output_width == 0 || output_height == 0 {
            return Err(EditError::invalid_dimension(format!(
                "Mask output size must be non-zero, got {output_width}x{output_height}"
            )));
        }

        let native = Self::render(grid);
        let image = if native.dimensions() == (output_width, output_height) {
            native
        } else {
            imageops::resize(
                &native,
                output_width,
                output_height,
                imageops::FilterType::Nearest,
            )
        };

        let mask = Mask {
            image,
            labels: grid.clone(),
        };
        debug!(
            distinct = ?mask.distinct_labels(),
            editable = mask.editable_pixels(),
            "Synthesized {}x{} mask",
            output_width,
            output_height
        );
        Ok(mask)
    }

    /// Mark every pixel that is fully transparent on `canvas` as preserved
    ///
    /// Padding around a fitted source holds no content to edit, whatever the
    /// stretched grid says about it. Returns the number of pixels cleared.
    ///
    /// # Errors
    /// - `DimensionMismatch` when canvas and mask differ in size
    pub fn preserve_transparent(mask: &mut Mask, canvas: &RgbaImage) -> Result<usize> {
        if mask.dimensions() != canvas.dimensions() {
            return Err(EditError::DimensionMismatch {
                source_dims: canvas.dimensions(),
                mask_dims: mask.dimensions(),
            });
        }

        let background = Self::pixel_for(0, 0);
        let mut cleared = 0;
        for (pixel, source) in mask.image.pixels_mut().zip(canvas.pixels()) {
            if source.0[3] == 0 && pixel.0[3] == EDITABLE_ALPHA {
                *pixel = background;
                cleared += 1;
            }
        }
        if cleared > 0 {
            debug!(cleared, "Cleared editable pixels over transparent padding");
        }
        Ok(cleared)
    }

    /// Render the grid at its native resolution
    ///
    /// A grid containing only label 0 yields alpha 0 everywhere.
    #[must_use]
    pub fn render(grid: &LabelGrid) -> RgbaImage {
        let max_label = grid.max_label().unwrap_or(0);
        RgbaImage::from_fn(grid.width(), grid.height(), |x, y| {
            Self::pixel_for(grid.get(x, y).unwrap_or(0), max_label)
        })
    }

    /// Mask pixel for one label given the largest label in the grid
    #[must_use]
    pub fn pixel_for(label: u32, max_label: u32) -> Rgba<u8> {
        if label == 0 || max_label == 0 {
            return Rgba([
                BACKGROUND_INTENSITY,
                BACKGROUND_INTENSITY,
                BACKGROUND_INTENSITY,
                PRESERVE_ALPHA,
            ]);
        }
        let intensity = Self::intensity(label, max_label);
        Rgba([intensity, intensity, intensity, EDITABLE_ALPHA])
    }

    /// `floor(label / max_label * 255)` in exact integer arithmetic
    #[must_use]
    pub fn intensity(label: u32, max_label: u32) -> u8 {
        if max_label == 0 {
            return BACKGROUND_INTENSITY;
        }
        let scaled = u64::from(label.min(max_label)) * 255 / u64::from(max_label);
        u8::try_from(scaled).unwrap_or(u8::MAX)
    }
}
