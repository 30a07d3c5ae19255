//! Core data types flowing between pipeline stages

use crate::error::{EditError, Result};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Cursor;

/// Square canvas a source image is fitted into
///
/// The fit is always "contain": aspect ratio is preserved and the uncovered
/// area is filled with fully transparent black.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasParams {
    /// Side length of the output canvas
    pub size: u32,
    /// Scale images smaller than the canvas up instead of only shrinking
    pub enlarge: bool,
    /// Canvas size whose placement this canvas reproduces
    ///
    /// Without `enlarge` the scale is capped at `size / layout_size`, so a
    /// canvas of a different size holds the image at the same relative
    /// position and extent. Zero means `size`.
    #[serde(default)]
    pub layout_size: u32,
}

impl CanvasParams {
    #[must_use]
    pub fn new(size: u32) -> Self {
        Self {
            size,
            enlarge: false,
            layout_size: size,
        }
    }

    /// Canvas of `size` placing images exactly as `other` does, scaled down
    /// or up by `size / other.size`
    #[must_use]
    pub fn mirroring(other: &CanvasParams, size: u32) -> Self {
        Self {
            size,
            enlarge: other.enlarge,
            layout_size: other.layout_size(),
        }
    }

    #[must_use]
    pub fn with_enlarge(mut self, enlarge: bool) -> Self {
        self.enlarge = enlarge;
        self
    }

    /// Effective layout reference size
    #[must_use]
    pub fn layout_size(&self) -> u32 {
        if self.layout_size == 0 {
            self.size
        } else {
            self.layout_size
        }
    }
}

/// Per-pixel semantic class labels produced by the segmentation model
///
/// Label `0` is reserved for background / no class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelGrid {
    width: u32,
    height: u32,
    labels: Vec<u32>,
}

impl LabelGrid {
    /// Create a grid from row-major labels
    ///
    /// # Errors
    /// - `labels.len()` differs from `width * height`
    pub fn new(width: u32, height: u32, labels: Vec<u32>) -> Result<Self> {
        let expected = width as usize * height as usize;
        if labels.len() != expected {
            return Err(EditError::inference(format!(
                "Label grid {}x{} needs {} labels, got {}",
                width,
                height,
                expected,
                labels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            labels,
        })
    }

    /// Create a grid from a slice of equally long rows
    ///
    /// # Errors
    /// - Rows of differing length
    pub fn from_rows(rows: &[Vec<u32>]) -> Result<Self> {
        let height = rows.len();
        let width = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|row| row.len() != width) {
            return Err(EditError::inference("Label grid rows differ in length"));
        }
        let labels = rows.iter().flatten().copied().collect();
        Self::new(width as u32, height as u32, labels)
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Row-major label values
    #[must_use]
    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    /// Label at `(x, y)`, `None` outside the grid
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.labels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Sorted set of label values present in the grid
    #[must_use]
    pub fn distinct_labels(&self) -> BTreeSet<u32> {
        self.labels.iter().copied().collect()
    }

    /// Largest label present, `None` for an empty grid
    #[must_use]
    pub fn max_label(&self) -> Option<u32> {
        self.labels.iter().copied().max()
    }
}

/// RGBA selection mask at the edit service resolution
///
/// Alpha `0` marks pixels to preserve, alpha `255` pixels the service may
/// regenerate. RGB carries a grayscale rendering of the normalized label for
/// inspection only. The label grid the mask was derived from is kept so that
/// callers can refine class selection without re-running inference.
#[derive(Debug, Clone)]
pub struct Mask {
    /// Mask pixels at the requested output size
    pub image: RgbaImage,
    /// Raw labels at inference resolution
    pub labels: LabelGrid,
}

impl Mask {
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Distinct labels of the underlying grid
    #[must_use]
    pub fn distinct_labels(&self) -> BTreeSet<u32> {
        self.labels.distinct_labels()
    }

    /// Normalization divisor used for the grayscale rendering
    #[must_use]
    pub fn max_label(&self) -> Option<u32> {
        self.labels.max_label()
    }

    /// Number of pixels marked as editable
    #[must_use]
    pub fn editable_pixels(&self) -> usize {
        self.image.pixels().filter(|p| p.0[3] == 255).count()
    }

    /// Encode the mask as PNG
    ///
    /// # Errors
    /// - PNG encoding failure
    pub fn to_png(&self) -> Result<Vec<u8>> {
        encode_png(&self.image)
    }
}

/// Encode an RGBA buffer as PNG bytes
///
/// # Errors
/// - PNG encoding failure
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, image::ImageFormat::Png)
        .map_err(|e| EditError::internal(format!("Failed to encode PNG: {e}")))?;
    Ok(buffer.into_inner())
}

/// Fully assembled submission for the edit service
///
/// Constructed only through [`EditRequest::assemble`], which enforces that
/// source and mask share the same pixel dimensions.
#[derive(Clone)]
pub struct EditRequest {
    /// PNG-encoded source image
    pub image_png: Vec<u8>,
    /// PNG-encoded mask image
    pub mask_png: Vec<u8>,
    /// Free-text edit instruction
    pub prompt: String,
    /// Number of variants requested
    pub variant_count: u8,
    /// Shared pixel dimensions of source and mask
    pub dimensions: (u32, u32),
}

impl std::fmt::Debug for EditRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditRequest")
            .field("image_png", &format_args!("{} bytes", self.image_png.len()))
            .field("mask_png", &format_args!("{} bytes", self.mask_png.len()))
            .field("prompt", &self.prompt)
            .field("variant_count", &self.variant_count)
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl EditRequest {
    /// Build a request from already encoded payloads
    ///
    /// # Errors
    /// - `DimensionMismatch` when the source and mask sizes differ
    pub fn assemble(
        image_png: Vec<u8>,
        source_dims: (u32, u32),
        mask_png: Vec<u8>,
        mask_dims: (u32, u32),
        prompt: impl Into<String>,
        variant_count: u8,
    ) -> Result<Self> {
        if source_dims != mask_dims {
            return Err(EditError::DimensionMismatch {
                source_dims,
                mask_dims,
            });
        }
        Ok(Self {
            image_png,
            mask_png,
            prompt: prompt.into(),
            variant_count,
            dimensions: source_dims,
        })
    }

    /// The `size` parameter sent to the service, e.g. `1024x1024`
    #[must_use]
    pub fn size_param(&self) -> String {
        format!("{}x{}", self.dimensions.0, self.dimensions.1)
    }
}

/// One generated image returned by the edit service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    /// Location of the generated image
    pub url: String,
    /// Prompt as rewritten by the service, when reported
    pub revised_prompt: Option<String>,
}

/// Response of the edit service: at least one generated image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditResult {
    /// Creation time reported by the service
    pub created: Option<chrono::DateTime<chrono::Utc>>,
    /// Generated images in service order
    pub images: Vec<GeneratedImage>,
}

impl EditResult {
    /// URL of the first generated image, the only one this pipeline consumes
    #[must_use]
    pub fn first_url(&self) -> Option<&str> {
        self.images.first().map(|image| image.url.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_grid_validation() {
        assert!(LabelGrid::new(2, 2, vec![0, 0, 0]).is_err());
        assert!(LabelGrid::from_rows(&[vec![0, 1], vec![0]]).is_err());

        let grid = LabelGrid::from_rows(&[vec![0, 0], vec![0, 5]]).unwrap();
        assert_eq!(grid.dimensions(), (2, 2));
        assert_eq!(grid.get(1, 1), Some(5));
        assert_eq!(grid.get(2, 0), None);
        assert_eq!(grid.max_label(), Some(5));
        assert_eq!(grid.distinct_labels().into_iter().collect::<Vec<_>>(), vec![0, 5]);
    }

    #[test]
    fn test_empty_grid() {
        let grid = LabelGrid::from_rows(&[]).unwrap();
        assert!(grid.is_empty());
        assert_eq!(grid.max_label(), None);
    }

    #[test]
    fn test_edit_request_enforces_equal_dimensions() {
        let err = EditRequest::assemble(vec![1], (1024, 1024), vec![2], (1024, 512), "hat", 1)
            .unwrap_err();
        assert!(matches!(
            err,
            EditError::DimensionMismatch {
                source_dims: (1024, 1024),
                mask_dims: (1024, 512)
            }
        ));

        let request =
            EditRequest::assemble(vec![1], (1024, 1024), vec![2], (1024, 1024), "hat", 1).unwrap();
        assert_eq!(request.size_param(), "1024x1024");
        assert!(format!("{request:?}").contains("1 bytes"));
    }

    #[test]
    fn test_edit_result_first_url() {
        let result = EditResult {
            created: None,
            images: vec![
                GeneratedImage {
                    url: "https://cdn.example/a.png".into(),
                    revised_prompt: None,
                },
                GeneratedImage {
                    url: "https://cdn.example/b.png".into(),
                    revised_prompt: None,
                },
            ],
        };
        assert_eq!(result.first_url(), Some("https://cdn.example/a.png"));
    }
}
