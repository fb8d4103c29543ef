use super::{check_probability, MiscEffect};
use crate::error::GeneratorError;
use crate::sample::{BoundingBox, DetectionSample};
use anyhow::{ensure, Result};
use image::{imageops, Rgb, RgbImage};
use rand::{Rng, RngCore};

fn intersection(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    w * h
}

fn area(b: &BoundingBox) -> f32 {
    (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0)
}

// ============================================================================
// Cutout
// ============================================================================

/// Blanks a random rectangle of the image.
///
/// Boxes that end up hidden by more than `max_occlusion` of their area are
/// removed together with their labels.
#[derive(Debug, Clone)]
pub struct Cutout {
    p: f64,
    max_fraction: f32,
    max_occlusion: f32,
    fill: u8,
}

impl Cutout {
    /// - `p`: chance the cutout is applied to a sample
    /// - `max_fraction`: largest cutout side relative to the image side
    /// - `max_occlusion`: boxes covered beyond this area ratio are dropped
    pub fn new(p: f64, max_fraction: f32, max_occlusion: f32) -> Result<Self> {
        check_probability("cutout", p)?;
        ensure!(
            max_fraction > 0.0 && max_fraction <= 1.0,
            GeneratorError::config(format!(
                "cutout max_fraction must be in (0.0, 1.0] (got {})",
                max_fraction
            ))
        );
        ensure!(
            (0.0..=1.0).contains(&max_occlusion),
            GeneratorError::config(format!(
                "cutout max_occlusion must be in [0.0, 1.0] (got {})",
                max_occlusion
            ))
        );
        Ok(Self {
            p,
            max_fraction,
            max_occlusion,
            fill: 0,
        })
    }

    pub fn fill(mut self, fill: u8) -> Self {
        self.fill = fill;
        self
    }

    /// Draws the cutout rectangle `[x1, y1, x2, y2]` in whole pixels.
    fn sample_region(&self, rng: &mut dyn RngCore, width: u32, height: u32) -> [u32; 4] {
        let max_w = ((width as f32 * self.max_fraction) as u32).max(1);
        let max_h = ((height as f32 * self.max_fraction) as u32).max(1);
        let cw = rng.random_range(1..=max_w);
        let ch = rng.random_range(1..=max_h);
        let x1 = rng.random_range(0..=width - cw);
        let y1 = rng.random_range(0..=height - ch);
        [x1, y1, x1 + cw, y1 + ch]
    }
}

impl MiscEffect for Cutout {
    fn apply(&self, mut sample: DetectionSample, rng: &mut dyn RngCore) -> Result<DetectionSample> {
        let (width, height) = sample.image.dimensions();
        if width == 0 || height == 0 || !rng.random_bool(self.p) {
            return Ok(sample);
        }

        let [x1, y1, x2, y2] = self.sample_region(rng, width, height);
        for y in y1..y2 {
            for x in x1..x2 {
                sample.image.put_pixel(x, y, Rgb([self.fill; 3]));
            }
        }

        let region = [x1 as f32, y1 as f32, x2 as f32, y2 as f32];
        let max_occlusion = self.max_occlusion;
        sample.annotations.retain_boxes(|b| {
            let a = area(b);
            a > 0.0 && intersection(b, &region) / a <= max_occlusion
        });
        Ok(sample)
    }
}

// ============================================================================
// CopyPaste
// ============================================================================

/// Copies one annotated object to a free spot of the same image and adds a
/// box for the copy.
///
/// A spot is free when the pasted patch intersects none of the existing
/// boxes. Up to `max_attempts` random spots are tried; when none is free the
/// sample is returned unchanged.
#[derive(Debug, Clone)]
pub struct CopyPaste {
    p: f64,
    max_attempts: usize,
}

impl CopyPaste {
    pub fn new(p: f64, max_attempts: usize) -> Result<Self> {
        check_probability("copy-paste", p)?;
        ensure!(
            max_attempts > 0,
            GeneratorError::config("copy-paste max_attempts must be > 0")
        );
        Ok(Self { p, max_attempts })
    }
}

impl MiscEffect for CopyPaste {
    fn apply(&self, mut sample: DetectionSample, rng: &mut dyn RngCore) -> Result<DetectionSample> {
        let (width, height) = sample.image.dimensions();
        if sample.annotations.is_empty() || !rng.random_bool(self.p) {
            return Ok(sample);
        }

        let pick = rng.random_range(0..sample.annotations.len());
        let label = sample.annotations.labels[pick];
        let source = sample.annotations.bboxes[pick];

        // Whole-pixel patch inside the image.
        let sx1 = source[0].max(0.0).floor() as u32;
        let sy1 = source[1].max(0.0).floor() as u32;
        let sx2 = (source[2].ceil() as u32).min(width);
        let sy2 = (source[3].ceil() as u32).min(height);
        if sx2 <= sx1 || sy2 <= sy1 {
            return Ok(sample);
        }
        let (pw, ph) = (sx2 - sx1, sy2 - sy1);
        if pw >= width || ph >= height {
            return Ok(sample);
        }

        for _ in 0..self.max_attempts {
            let dx = rng.random_range(0..=width - pw);
            let dy = rng.random_range(0..=height - ph);
            let target = [dx as f32, dy as f32, (dx + pw) as f32, (dy + ph) as f32];

            if sample
                .annotations
                .bboxes
                .iter()
                .all(|b| intersection(b, &target) == 0.0)
            {
                let patch = imageops::crop_imm(&sample.image, sx1, sy1, pw, ph).to_image();
                imageops::replace(&mut sample.image, &patch, dx as i64, dy as i64);
                sample.annotations.push(label, target);
                break;
            }
        }
        Ok(sample)
    }
}
