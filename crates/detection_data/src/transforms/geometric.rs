use super::{check_probability, check_range, uniform, GeometricTransform};
use crate::error::GeneratorError;
use crate::sample::{BoundingBox, DetectionSample};
use anyhow::{anyhow, ensure, Result};
use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{warp, Interpolation, Projection};
use rand::{Rng, RngCore};

/// Row-major homogeneous 2D transform.
pub type Affine = [[f32; 3]; 3];

const IDENTITY: Affine = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

// ============================================================================
// RandomAffine
// ============================================================================

/// Random rotation, translation, shear, scaling and flips, composed into one
/// affine map around the image center.
///
/// The image is resampled bilinearly with `imageproc`; pixels with no
/// source are set to `fill`. Each box is replaced by the axis-aligned hull of
/// its four transformed corners. Boxes are not clipped here, that is left to
/// the post-pass validator.
///
/// Translation is relative to the image size: `0.1` moves by a tenth of the
/// width (or height).
///
/// # Example
/// ```ignore
/// let affine = RandomAffine::default()
///     .rotation(-0.1, 0.1)?
///     .flip(0.5, 0.0)?;
/// let sample = affine.apply(sample, &mut rng)?;
/// ```
#[derive(Debug, Clone)]
pub struct RandomAffine {
    rotation: (f32, f32),
    translation_x: (f32, f32),
    translation_y: (f32, f32),
    shear: (f32, f32),
    scaling_x: (f32, f32),
    scaling_y: (f32, f32),
    flip_x_chance: f64,
    flip_y_chance: f64,
    fill: u8,
}

impl Default for RandomAffine {
    /// Identity map: every parameter disabled.
    fn default() -> Self {
        Self {
            rotation: (0.0, 0.0),
            translation_x: (0.0, 0.0),
            translation_y: (0.0, 0.0),
            shear: (0.0, 0.0),
            scaling_x: (1.0, 1.0),
            scaling_y: (1.0, 1.0),
            flip_x_chance: 0.0,
            flip_y_chance: 0.0,
            fill: 0,
        }
    }
}

impl RandomAffine {
    /// The full random-transform preset used for detector training.
    pub fn training_preset() -> Self {
        Self {
            rotation: (-0.1, 0.1),
            translation_x: (-0.1, 0.1),
            translation_y: (-0.1, 0.1),
            shear: (-0.1, 0.1),
            scaling_x: (0.9, 1.1),
            scaling_y: (0.9, 1.1),
            flip_x_chance: 0.5,
            flip_y_chance: 0.5,
            fill: 0,
        }
    }

    /// Rotation range in radians.
    pub fn rotation(mut self, min: f32, max: f32) -> Result<Self> {
        check_range("rotation", (min, max))?;
        self.rotation = (min, max);
        Ok(self)
    }

    /// Relative translation ranges for x and y.
    pub fn translation(mut self, x: (f32, f32), y: (f32, f32)) -> Result<Self> {
        check_range("translation_x", x)?;
        check_range("translation_y", y)?;
        self.translation_x = x;
        self.translation_y = y;
        Ok(self)
    }

    /// Shear angle range in radians.
    pub fn shear(mut self, min: f32, max: f32) -> Result<Self> {
        check_range("shear", (min, max))?;
        self.shear = (min, max);
        Ok(self)
    }

    pub fn scaling(mut self, x: (f32, f32), y: (f32, f32)) -> Result<Self> {
        check_range("scaling_x", x)?;
        check_range("scaling_y", y)?;
        ensure!(
            x.0 > 0.0 && y.0 > 0.0,
            GeneratorError::config(format!(
                "scaling factors must be positive (got x={:?}, y={:?})",
                x, y
            ))
        );
        self.scaling_x = x;
        self.scaling_y = y;
        Ok(self)
    }

    pub fn flip(mut self, x_chance: f64, y_chance: f64) -> Result<Self> {
        check_probability("flip_x", x_chance)?;
        check_probability("flip_y", y_chance)?;
        self.flip_x_chance = x_chance;
        self.flip_y_chance = y_chance;
        Ok(self)
    }

    /// Value written where the warped image has no source pixel.
    pub fn fill(mut self, fill: u8) -> Self {
        self.fill = fill;
        self
    }

    /// Draws one transform for an image of the given size.
    pub fn sample_transform(&self, rng: &mut dyn RngCore, width: u32, height: u32) -> Affine {
        let angle = uniform(rng, self.rotation);
        let tx = uniform(rng, self.translation_x) * width as f32;
        let ty = uniform(rng, self.translation_y) * height as f32;
        let shear = uniform(rng, self.shear);
        let sx = uniform(rng, self.scaling_x);
        let sy = uniform(rng, self.scaling_y);
        let fx = if draw(rng, self.flip_x_chance) { -1.0 } else { 1.0 };
        let fy = if draw(rng, self.flip_y_chance) { -1.0 } else { 1.0 };

        let (cx, cy) = (0.5 * width as f32, 0.5 * height as f32);
        [
            translation(cx, cy),
            rotation(angle),
            translation(tx, ty),
            shear_matrix(shear),
            scaling(sx, sy),
            scaling(fx, fy),
            translation(-cx, -cy),
        ]
        .iter()
        .fold(IDENTITY, |acc, m| matmul(&acc, m))
    }
}

impl GeometricTransform for RandomAffine {
    fn apply(&self, mut sample: DetectionSample, rng: &mut dyn RngCore) -> Result<DetectionSample> {
        let transform = self.sample_transform(rng, sample.width(), sample.height());
        if transform == IDENTITY {
            return Ok(sample);
        }

        sample.image = warp_affine(&sample.image, &transform, self.fill)?;
        sample
            .annotations
            .map_boxes(|b| *b = transform_aabb(&transform, b));
        Ok(sample)
    }
}

fn draw(rng: &mut dyn RngCore, p: f64) -> bool {
    p > 0.0 && rng.random_bool(p)
}

fn translation(tx: f32, ty: f32) -> Affine {
    [[1.0, 0.0, tx], [0.0, 1.0, ty], [0.0, 0.0, 1.0]]
}

fn rotation(angle: f32) -> Affine {
    let (s, c) = angle.sin_cos();
    [[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]]
}

fn shear_matrix(angle: f32) -> Affine {
    let (s, c) = angle.sin_cos();
    [[1.0, -s, 0.0], [0.0, c, 0.0], [0.0, 0.0, 1.0]]
}

fn scaling(sx: f32, sy: f32) -> Affine {
    [[sx, 0.0, 0.0], [0.0, sy, 0.0], [0.0, 0.0, 1.0]]
}

fn matmul(a: &Affine, b: &Affine) -> Affine {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, v) in row.iter_mut().enumerate() {
            *v = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

fn apply_point(m: &Affine, x: f32, y: f32) -> (f32, f32) {
    (
        m[0][0] * x + m[0][1] * y + m[0][2],
        m[1][0] * x + m[1][1] * y + m[1][2],
    )
}

/// Axis-aligned hull of the four corners of `b` under `m`.
pub fn transform_aabb(m: &Affine, b: &BoundingBox) -> BoundingBox {
    let [x1, y1, x2, y2] = *b;
    let corners = [(x1, y1), (x2, y1), (x1, y2), (x2, y2)].map(|(x, y)| apply_point(m, x, y));

    corners.iter().fold(
        [f32::INFINITY, f32::INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY],
        |[min_x, min_y, max_x, max_y], &(x, y)| {
            [min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y)]
        },
    )
}

/// Resamples `src` through `m` with bilinear interpolation. Output pixels
/// whose preimage falls outside `src` are set to `fill`.
pub fn warp_affine(src: &RgbImage, m: &Affine, fill: u8) -> Result<RgbImage> {
    let [r0, r1, r2] = *m;
    let projection = Projection::from_matrix([
        r0[0], r0[1], r0[2], r1[0], r1[1], r1[2], r2[0], r2[1], r2[2],
    ])
    .ok_or_else(|| anyhow!("affine transform is singular"))?;
    Ok(warp(src, &projection, Interpolation::Bilinear, Rgb([fill; 3])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Annotations;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_default_is_identity() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(1);
        let ann = Annotations::from_boxes(&[(2.0, 3.0, 7.0, 9.0, 0)]);
        let image = RgbImage::from_pixel(10, 10, Rgb([9, 9, 9]));
        let sample = DetectionSample::new(0, image, ann.clone());

        let out = RandomAffine::default().apply(sample, &mut rng)?;
        assert_eq!(out.annotations, ann);
        assert_eq!(out.image.get_pixel(0, 0).0, [9, 9, 9]);
        Ok(())
    }

    #[test]
    fn test_horizontal_flip_mirrors_boxes_about_center() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(1);
        let mut img = RgbImage::new(10, 4);
        img.put_pixel(1, 0, Rgb([255, 0, 0]));
        let ann = Annotations::from_boxes(&[(1.0, 0.0, 3.0, 2.0, 0)]);
        let sample = DetectionSample::new(0, img, ann);

        let out = RandomAffine::default().flip(1.0, 0.0)?.apply(sample, &mut rng)?;
        // x -> 10 - x about the center at 5.0
        assert_eq!(out.annotations.bboxes[0], [7.0, 0.0, 9.0, 2.0]);
        assert_eq!(out.image.get_pixel(9, 0).0, [255, 0, 0]);
        assert_eq!(out.image.get_pixel(1, 0).0, [0, 0, 0]);
        Ok(())
    }

    #[test]
    fn test_rotated_box_hull_contains_all_corners() {
        let m = matmul(
            &matmul(&translation(50.0, 50.0), &rotation(std::f32::consts::FRAC_PI_4)),
            &translation(-50.0, -50.0),
        );
        let hull = transform_aabb(&m, &[40.0, 40.0, 60.0, 60.0]);
        let half_diag = 10.0 * std::f32::consts::SQRT_2;
        let expected = [50.0 - half_diag, 50.0 - half_diag, 50.0 + half_diag, 50.0 + half_diag];
        for (got, want) in hull.iter().zip(expected) {
            assert!((got - want).abs() < 1e-3, "{:?}", hull);
        }
    }

    #[test]
    fn test_translation_fills_uncovered_pixels() -> Result<()> {
        let src = RgbImage::from_pixel(4, 4, Rgb([200, 200, 200]));
        let out = warp_affine(&src, &translation(2.0, 0.0), 7)?;
        assert_eq!(out.get_pixel(0, 0).0, [7, 7, 7]);
        assert_eq!(out.get_pixel(1, 2).0, [7, 7, 7]);
        assert_eq!(out.get_pixel(3, 1).0, [200, 200, 200]);
        Ok(())
    }
}
