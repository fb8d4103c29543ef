//! src/transforms/mod.rs
//!
//! Per-sample augmentation stages and the letterbox preprocessor.
//!
//! ```text
//! src/transforms/
//! ├── mod.rs         # Stage traits + AugmentationPipeline
//! ├── visual.rs      # ColorJitter (pixels only)
//! ├── geometric.rs   # RandomAffine (image + boxes)
//! ├── misc.rs        # Cutout, CopyPaste (may add/remove boxes)
//! └── letterbox.rs   # Letterbox resize onto a square canvas
//! ```
//!
//! Every stage draws its randomness from the `rng` argument. Nothing in this
//! module touches a global or thread-local random source, so a seeded
//! generator handed in by the caller fully determines the output.

pub mod geometric;
pub mod letterbox;
pub mod misc;
pub mod visual;

pub use geometric::RandomAffine;
pub use letterbox::Letterbox;
pub use misc::{CopyPaste, Cutout};
pub use visual::ColorJitter;

use crate::error::GeneratorError;
use crate::sample::DetectionSample;
use anyhow::Result;
use image::RgbImage;
use rand::{Rng, RngCore};
use std::fmt;
use std::sync::Arc;

/// A pixel-domain effect. It only sees the image, so boxes cannot change.
pub trait VisualEffect: Send + Sync {
    fn apply(&self, image: &mut RgbImage, rng: &mut dyn RngCore) -> Result<()>;
}

/// A warp of the image whose boxes must follow it.
pub trait GeometricTransform: Send + Sync {
    fn apply(&self, sample: DetectionSample, rng: &mut dyn RngCore) -> Result<DetectionSample>;
}

/// A composite effect over final box geometry. May add or remove boxes.
///
/// Implementations can assume the sample carries at least one box; the
/// pipeline rejects empty samples before calling them.
pub trait MiscEffect: Send + Sync {
    fn apply(&self, sample: DetectionSample, rng: &mut dyn RngCore) -> Result<DetectionSample>;
}

/// Runs the three optional stages in their fixed order:
/// visual effect → geometric transform → misc effect.
///
/// Color jitter runs before the warp so that the border introduced by the
/// warp keeps the fill value. Misc effects see the final box geometry.
///
/// # Example
/// ```ignore
/// let pipeline = AugmentationPipeline::new()
///     .with_visual_effect(ColorJitter::default())
///     .with_geometric(RandomAffine::default())
///     .with_misc_effect(Cutout::new(0.5, 0.25, 0.7)?);
/// let augmented = pipeline.apply(sample, &mut rng)?;
/// ```
#[derive(Clone, Default)]
pub struct AugmentationPipeline {
    visual_effect: Option<Arc<dyn VisualEffect>>,
    geometric: Option<Arc<dyn GeometricTransform>>,
    misc_effect: Option<Arc<dyn MiscEffect>>,
}

impl AugmentationPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_visual_effect(mut self, effect: impl VisualEffect + 'static) -> Self {
        self.visual_effect = Some(Arc::new(effect));
        self
    }

    pub fn with_geometric(mut self, transform: impl GeometricTransform + 'static) -> Self {
        self.geometric = Some(Arc::new(transform));
        self
    }

    pub fn with_misc_effect(mut self, effect: impl MiscEffect + 'static) -> Self {
        self.misc_effect = Some(Arc::new(effect));
        self
    }

    /// True when no stage is configured.
    pub fn is_identity(&self) -> bool {
        self.visual_effect.is_none() && self.geometric.is_none() && self.misc_effect.is_none()
    }

    pub fn apply(
        &self,
        mut sample: DetectionSample,
        rng: &mut dyn RngCore,
    ) -> Result<DetectionSample> {
        if let Some(effect) = &self.visual_effect {
            effect.apply(&mut sample.image, rng)?;
        }

        if let Some(transform) = &self.geometric {
            sample = transform.apply(sample, rng)?;
        }

        if let Some(effect) = &self.misc_effect {
            if sample.annotations.is_empty() {
                return Err(GeneratorError::MiscEffectPrecondition {
                    index: sample.index,
                }
                .into());
            }
            sample = effect.apply(sample, rng)?;
        }

        Ok(sample)
    }
}

impl fmt::Debug for AugmentationPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AugmentationPipeline")
            .field("visual_effect", &self.visual_effect.is_some())
            .field("geometric", &self.geometric.is_some())
            .field("misc_effect", &self.misc_effect.is_some())
            .finish()
    }
}

/// Draws uniformly from `[lo, hi)`, or returns `lo` for a degenerate range.
pub(crate) fn uniform(rng: &mut dyn RngCore, (lo, hi): (f32, f32)) -> f32 {
    if lo < hi {
        rng.random_range(lo..hi)
    } else {
        lo
    }
}

/// Ensures a `(min, max)` range is well-formed.
pub(crate) fn check_range(name: &str, (lo, hi): (f32, f32)) -> Result<()> {
    anyhow::ensure!(
        lo.is_finite() && hi.is_finite() && lo <= hi,
        GeneratorError::config(format!(
            "{} range must satisfy min <= max (got ({}, {}))",
            name, lo, hi
        ))
    );
    Ok(())
}

pub(crate) fn check_probability(name: &str, p: f64) -> Result<()> {
    anyhow::ensure!(
        (0.0..=1.0).contains(&p),
        GeneratorError::config(format!(
            "{} probability must be in [0.0, 1.0] range (got {})",
            name, p
        ))
    );
    Ok(())
}
