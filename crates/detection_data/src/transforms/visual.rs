use super::{check_probability, check_range, uniform, VisualEffect};
use anyhow::Result;
use image::RgbImage;
use rand::{Rng, RngCore};

// ============================================================================
// ColorJitter
// ============================================================================

/// Randomly perturbs contrast, brightness, hue and saturation.
///
/// One factor per operation is drawn per sample:
/// - contrast: per-channel `(v - mean) * factor + mean`
/// - brightness: `v + delta`, with `delta` in units of full scale
/// - hue: rotation of the hue wheel by `delta` turns
/// - saturation: `s * factor`
///
/// A degenerate range such as `(1.0, 1.0)` disables that operation.
/// The whole effect fires with probability `p`.
///
/// # Example
/// ```ignore
/// let jitter = ColorJitter::new((0.9, 1.1), (-0.1, 0.1), (-0.05, 0.05), (0.95, 1.05))?;
/// jitter.apply(&mut image, &mut rng)?;
/// ```
#[derive(Debug, Clone)]
pub struct ColorJitter {
    contrast: (f32, f32),
    brightness: (f32, f32),
    hue: (f32, f32),
    saturation: (f32, f32),
    p: f64,
}

impl Default for ColorJitter {
    fn default() -> Self {
        Self {
            contrast: (0.9, 1.1),
            brightness: (-0.1, 0.1),
            hue: (-0.05, 0.05),
            saturation: (0.95, 1.05),
            p: 1.0,
        }
    }
}

impl ColorJitter {
    pub fn new(
        contrast: (f32, f32),
        brightness: (f32, f32),
        hue: (f32, f32),
        saturation: (f32, f32),
    ) -> Result<Self> {
        check_range("contrast", contrast)?;
        check_range("brightness", brightness)?;
        check_range("hue", hue)?;
        check_range("saturation", saturation)?;
        anyhow::ensure!(
            contrast.0 >= 0.0 && saturation.0 >= 0.0,
            crate::error::GeneratorError::config("contrast and saturation factors must be >= 0")
        );
        Ok(Self {
            contrast,
            brightness,
            hue,
            saturation,
            p: 1.0,
        })
    }

    pub fn with_probability(mut self, p: f64) -> Result<Self> {
        check_probability("color jitter", p)?;
        self.p = p;
        Ok(self)
    }

    fn adjust_contrast(pixels: &mut [[f32; 3]], factor: f32) {
        if pixels.is_empty() {
            return;
        }
        let n = pixels.len() as f32;
        let mut mean = [0.0f32; 3];
        for px in pixels.iter() {
            for c in 0..3 {
                mean[c] += px[c];
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        for px in pixels.iter_mut() {
            for c in 0..3 {
                px[c] = (px[c] - mean[c]) * factor + mean[c];
            }
        }
    }

    fn adjust_hue_saturation(pixels: &mut [[f32; 3]], hue_delta: f32, sat_factor: f32) {
        for px in pixels.iter_mut() {
            let (h, s, v) = rgb_to_hsv(clamp_unit(*px));
            let h = (h + hue_delta).rem_euclid(1.0);
            let s = (s * sat_factor).clamp(0.0, 1.0);
            *px = hsv_to_rgb(h, s, v);
        }
    }
}

impl VisualEffect for ColorJitter {
    fn apply(&self, image: &mut RgbImage, rng: &mut dyn RngCore) -> Result<()> {
        if self.p <= 0.0 || (self.p < 1.0 && !rng.random_bool(self.p)) {
            return Ok(());
        }

        let contrast = uniform(rng, self.contrast);
        let brightness = uniform(rng, self.brightness);
        let hue = uniform(rng, self.hue);
        let saturation = uniform(rng, self.saturation);

        let mut pixels: Vec<[f32; 3]> = image
            .pixels()
            .map(|p| p.0.map(|c| c as f32 / 255.0))
            .collect();

        if contrast != 1.0 {
            Self::adjust_contrast(&mut pixels, contrast);
        }
        if brightness != 0.0 {
            pixels
                .iter_mut()
                .for_each(|px| px.iter_mut().for_each(|c| *c += brightness));
        }
        if hue != 0.0 || saturation != 1.0 {
            Self::adjust_hue_saturation(&mut pixels, hue, saturation);
        }

        for (dst, px) in image.pixels_mut().zip(pixels) {
            dst.0 = clamp_unit(px).map(|c| (c * 255.0).round() as u8);
        }
        Ok(())
    }
}

fn clamp_unit(px: [f32; 3]) -> [f32; 3] {
    px.map(|c| c.clamp(0.0, 1.0))
}

/// RGB in `[0, 1]` to `(hue in turns, saturation, value)`.
fn rgb_to_hsv([r, g, b]: [f32; 3]) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta <= f32::EPSILON {
        0.0
    } else if max == r {
        ((g - b) / delta).rem_euclid(6.0) / 6.0
    } else if max == g {
        ((b - r) / delta + 2.0) / 6.0
    } else {
        ((r - g) / delta + 4.0) / 6.0
    };
    let s = if max <= f32::EPSILON { 0.0 } else { delta / max };
    (h, s, max)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [f32; 3] {
    let c = v * s;
    let h6 = h * 6.0;
    let x = c * (1.0 - (h6.rem_euclid(2.0) - 1.0).abs());
    let m = v - c;
    let (r, g, b) = match h6 as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    [r + m, g + m, b + m]
}
