use crate::error::GeneratorError;
use crate::sample::{DetectionSample, PreparedSample};
use anyhow::{ensure, Result};
use image::{imageops, imageops::FilterType, Rgb, RgbImage};

/// Canvas value outside the resized image.
pub const LETTERBOX_FILL: u8 = 128;

// ============================================================================
// Letterbox
// ============================================================================

/// Resizes an image so its longer side equals `side`, preserving the aspect
/// ratio, and centers it on a `side x side` canvas filled with neutral gray.
///
/// Boxes are scaled by the same factor and shifted by the padding offsets.
///
/// # Example
/// ```ignore
/// let letterbox = Letterbox::new(416)?;
/// let prepared = letterbox.apply(sample)?;
/// assert_eq!(prepared.image.dimensions(), (416, 416));
/// ```
#[derive(Debug, Clone)]
pub struct Letterbox {
    side: u32,
    filter: FilterType,
}

impl Letterbox {
    pub fn new(side: u32) -> Result<Self> {
        ensure!(
            side > 0,
            GeneratorError::config("letterbox side must be positive")
        );
        Ok(Self {
            side,
            filter: FilterType::Triangle,
        })
    }

    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }

    pub fn side(&self) -> u32 {
        self.side
    }

    /// Resized dimensions and scale factor for a `width x height` image.
    pub fn resized_dims(&self, width: u32, height: u32) -> (u32, u32, f32) {
        let side = self.side as f32;
        if height > width {
            let scale = side / height as f32;
            let rw = ((width as f32 * scale) as u32).max(1);
            (rw, self.side, scale)
        } else {
            let scale = side / width as f32;
            let rh = ((height as f32 * scale) as u32).max(1);
            (self.side, rh, scale)
        }
    }

    pub fn apply(&self, sample: DetectionSample) -> Result<PreparedSample> {
        let DetectionSample {
            index,
            image,
            mut annotations,
        } = sample;
        let (width, height) = image.dimensions();
        ensure!(
            width > 0 && height > 0,
            GeneratorError::contract(index, "cannot letterbox an empty image")
        );

        let (rw, rh, scale) = self.resized_dims(width, height);
        let offset_w = (self.side - rw) / 2;
        let offset_h = (self.side - rh) / 2;

        let resized = if (rw, rh) == (width, height) {
            image
        } else {
            imageops::resize(&image, rw, rh, self.filter)
        };
        let mut canvas = RgbImage::from_pixel(self.side, self.side, Rgb([LETTERBOX_FILL; 3]));
        imageops::replace(&mut canvas, &resized, offset_w as i64, offset_h as i64);

        let (ow, oh) = (offset_w as f32, offset_h as f32);
        annotations.map_boxes(|b| {
            *b = [
                b[0] * scale + ow,
                b[1] * scale + oh,
                b[2] * scale + ow,
                b[3] * scale + oh,
            ];
        });

        Ok(PreparedSample {
            index,
            image: canvas,
            annotations,
            scale,
            offset: (offset_w, offset_h),
        })
    }
}
