//! src/validation.rs
//!
//! Two-pass validation of bounding boxes.
//!
//! ```text
//!  load ──▶ contract check ──▶ pre-pass ──▶ augment ──▶ letterbox ──▶ post-pass ──▶ assemble
//!           (fatal)            drop invalid                          clip + drop small,
//!                              keep sample                           drop emptied sample
//! ```
//!
//! Data problems never raise: offending boxes are removed, a `warn!` event
//! is emitted and the returned report says what happened. Only a broken
//! dataset contract is an error.

use crate::error::GeneratorError;
use crate::sample::{Annotations, BoundingBox, DetectionSample, PreparedSample};
use anyhow::Result;
use image::RgbImage;
use tracing::warn;

/// Smallest width and height, in canvas pixels, a box may have after clipping.
pub const MIN_BOX_SIDE: f32 = 10.0;

/// What a validation pass removed from one sample.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterReport {
    /// Original indices of the removed boxes.
    pub removed: Vec<usize>,
    /// The sample has no boxes left.
    pub emptied: bool,
}

impl FilterReport {
    pub fn is_clean(&self) -> bool {
        self.removed.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct AnnotationValidator {
    min_box_side: f32,
}

impl Default for AnnotationValidator {
    fn default() -> Self {
        Self {
            min_box_side: MIN_BOX_SIDE,
        }
    }
}

impl AnnotationValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks what the dataset returned before any augmentation runs.
    ///
    /// Fails with `GeneratorError::AnnotationContract` when labels and boxes
    /// are not index-aligned, a label is outside `[0, num_classes)`, or the
    /// image is empty.
    pub fn check_contract(
        &self,
        index: usize,
        image: &RgbImage,
        annotations: &Annotations,
        num_classes: usize,
    ) -> Result<()> {
        if image.width() == 0 || image.height() == 0 {
            return Err(GeneratorError::contract(index, "image has zero width or height").into());
        }
        if annotations.labels.len() != annotations.bboxes.len() {
            return Err(GeneratorError::contract(
                index,
                format!(
                    "{} labels but {} bboxes",
                    annotations.labels.len(),
                    annotations.bboxes.len()
                ),
            )
            .into());
        }
        if let Some(label) = annotations.labels.iter().find(|&&l| l >= num_classes) {
            return Err(GeneratorError::contract(
                index,
                format!("label {} out of range for {} classes", label, num_classes),
            )
            .into());
        }
        Ok(())
    }

    /// Pre-pass over a freshly loaded sample.
    ///
    /// Drops boxes with `x2 <= x1`, `y2 <= y1`, a negative or non-finite
    /// coordinate, or an edge past the image bounds. A sample left without
    /// boxes is kept.
    pub fn filter_annotations(&self, sample: &mut DetectionSample) -> FilterReport {
        let (w, h) = (sample.width() as f32, sample.height() as f32);
        let mut dropped_boxes = Vec::new();
        let removed = sample.annotations.retain_boxes(|b| {
            let keep = is_within_image(b, w, h);
            if !keep {
                dropped_boxes.push(*b);
            }
            keep
        });

        if !removed.is_empty() {
            let dropped: Vec<(usize, BoundingBox)> =
                removed.iter().copied().zip(dropped_boxes).collect();
            warn!(
                index = sample.index,
                width = w,
                height = h,
                ?dropped,
                "Image has invalid bounding boxes, removing them"
            );
        }

        let emptied = sample.annotations.is_empty();
        if emptied {
            warn!(
                index = sample.index,
                "Image has no valid bounding boxes, keeping it without annotations"
            );
        }
        FilterReport { removed, emptied }
    }

    /// Post-pass over a letterboxed sample.
    ///
    /// Clips `(x1, y1)` into `[0, W-2] x [0, H-2]` and `(x2, y2)` into
    /// `[1, W-1] x [1, H-1]`, then drops boxes narrower or shorter than the
    /// minimum side. `emptied` in the report means the sample must be
    /// excluded from its batch.
    pub fn clip_transformed_annotations(&self, sample: &mut PreparedSample) -> FilterReport {
        let (w, h) = (sample.image.width() as f32, sample.image.height() as f32);
        sample.annotations.map_boxes(|b| {
            b[0] = b[0].clamp(0.0, w - 2.0);
            b[1] = b[1].clamp(0.0, h - 2.0);
            b[2] = b[2].clamp(1.0, w - 1.0);
            b[3] = b[3].clamp(1.0, h - 1.0);
        });

        let min = self.min_box_side;
        let removed = sample
            .annotations
            .retain_boxes(|b| b[2] - b[0] >= min && b[3] - b[1] >= min);

        let emptied = sample.annotations.is_empty();
        if emptied {
            warn!(
                index = sample.index,
                removed = removed.len(),
                "Image has no bounding boxes left after augmentation, dropping it from the batch"
            );
        }
        FilterReport { removed, emptied }
    }

    /// Runs the post-pass over a group and keeps only the samples that still
    /// have boxes. Relative order is preserved.
    pub fn clip_group(&self, samples: Vec<PreparedSample>) -> Vec<PreparedSample> {
        samples
            .into_iter()
            .filter_map(|mut s| {
                let report = self.clip_transformed_annotations(&mut s);
                (!report.emptied).then_some(s)
            })
            .collect()
    }
}

fn is_within_image(b: &BoundingBox, w: f32, h: f32) -> bool {
    let [x1, y1, x2, y2] = *b;
    b.iter().all(|v| v.is_finite())
        && x1 >= 0.0
        && y1 >= 0.0
        && x2 > x1
        && y2 > y1
        && x2 <= w
        && y2 <= h
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prepared(side: u32, boxes: &[(f32, f32, f32, f32, usize)]) -> PreparedSample {
        PreparedSample {
            index: 0,
            image: RgbImage::new(side, side),
            annotations: Annotations::from_boxes(boxes),
            scale: 1.0,
            offset: (0, 0),
        }
    }

    #[test]
    fn test_pre_pass_drops_invalid_and_keeps_sample() {
        let validator = AnnotationValidator::new();
        let ann = Annotations::from_boxes(&[
            (10.0, 10.0, 5.0, 20.0, 0),  // x2 <= x1
            (-1.0, 0.0, 5.0, 5.0, 1),    // negative
            (0.0, 0.0, 101.0, 10.0, 2),  // past right edge
            (0.0, 0.0, f32::NAN, 1.0, 3),
            (0.0, 0.0, 100.0, 50.0, 4),  // touches the far edge, valid
        ]);
        let mut sample = DetectionSample::new(0, RgbImage::new(100, 50), ann);

        let report = validator.filter_annotations(&mut sample);
        assert_eq!(report.removed, vec![0, 1, 2, 3]);
        assert!(!report.emptied);
        assert_eq!(sample.annotations.labels, vec![4]);
    }

    #[test]
    fn test_pre_pass_keeps_emptied_sample() {
        let validator = AnnotationValidator::new();
        let ann = Annotations::from_boxes(&[(5.0, 5.0, 5.0, 9.0, 0)]);
        let mut sample = DetectionSample::new(0, RgbImage::new(20, 20), ann);

        let report = validator.filter_annotations(&mut sample);
        assert!(report.emptied);
        assert!(sample.annotations.is_empty());
    }

    #[test]
    fn test_pre_pass_is_idempotent() {
        let validator = AnnotationValidator::new();
        let ann = Annotations::from_boxes(&[(0.0, 0.0, 3.0, 3.0, 0), (-2.0, 1.0, 4.0, 4.0, 0)]);
        let mut sample = DetectionSample::new(0, RgbImage::new(10, 10), ann);

        validator.filter_annotations(&mut sample);
        let second = validator.filter_annotations(&mut sample);
        assert!(second.is_clean());
    }

    #[test]
    fn test_post_pass_min_side_is_inclusive() {
        let validator = AnnotationValidator::new();
        let mut sample = prepared(64, &[(10.0, 10.0, 20.0, 20.0, 0), (5.0, 5.0, 6.0, 6.0, 1)]);

        let report = validator.clip_transformed_annotations(&mut sample);
        assert_eq!(report.removed, vec![1]);
        assert_eq!(sample.annotations.bboxes, vec![[10.0, 10.0, 20.0, 20.0]]);
        assert_eq!(sample.annotations.labels, vec![0]);
    }

    #[test]
    fn test_post_pass_clips_into_canvas() {
        let validator = AnnotationValidator::new();
        let mut sample = prepared(64, &[(-8.0, -3.0, 90.0, 70.0, 0)]);

        validator.clip_transformed_annotations(&mut sample);
        assert_eq!(sample.annotations.bboxes[0], [0.0, 0.0, 63.0, 63.0]);
    }

    #[test]
    fn test_clip_group_drops_emptied_samples() {
        let validator = AnnotationValidator::new();
        let samples = vec![
            prepared(64, &[(1.0, 1.0, 3.0, 3.0, 0)]),
            prepared(64, &[(1.0, 1.0, 30.0, 30.0, 0)]),
        ];
        let kept = validator.clip_group(samples);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].annotations.len(), 1);
    }

    #[test]
    fn test_contract_violations() {
        let validator = AnnotationValidator::new();
        let image = RgbImage::new(4, 4);

        let misaligned = Annotations::new(vec![0, 1], vec![[0.0, 0.0, 1.0, 1.0]]);
        assert!(validator.check_contract(0, &image, &misaligned, 2).is_err());

        let bad_label = Annotations::from_boxes(&[(0.0, 0.0, 1.0, 1.0, 5)]);
        let err = validator
            .check_contract(3, &image, &bad_label, 2)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GeneratorError>(),
            Some(GeneratorError::AnnotationContract { index: 3, .. })
        ));

        let ok = Annotations::from_boxes(&[(0.0, 0.0, 1.0, 1.0, 1)]);
        assert!(validator.check_contract(0, &image, &ok, 2).is_ok());
        assert!(validator
            .check_contract(0, &RgbImage::new(0, 4), &ok, 2)
            .is_err());
    }
}
