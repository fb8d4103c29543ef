//! src/batch.rs
//!
//! Fixed-shape batch assembly.
//!
//! A `DetectionBatch` always has the same leading dimension `N = batch_size`
//! and the same box capacity `MAX_BOXES`; only the image side `S` may change
//! between batches under multi-scale training.
//!
//! | tensor        | kind    | shape             | content                              |
//! |---------------|---------|-------------------|--------------------------------------|
//! | `images`      | Float   | `[N, S, S, 3]`    | letterboxed pixels in `[0, 1]`       |
//! | `gt_boxes`    | Float   | `[N, MAX, 5]`     | `x1, y1, x2, y2, label`, zero-padded |
//! | `grid_shapes` | Int     | `[N, 3, 2]`       | `S / {32, 16, 8}`                    |
//! | `targets`     | Float   | `2 x [N]`         | zeros, the loss is computed in-graph |

use crate::error::GeneratorError;
use crate::sample::PreparedSample;
use crate::transforms::letterbox::LETTERBOX_FILL;
use anyhow::{ensure, Result};
use tch::{Device, Kind, Tensor};
use tracing::warn;

/// Strides of the three detection heads, coarsest first.
pub const STRIDES: [u32; 3] = [32, 16, 8];

/// Default per-image box capacity.
pub const DEFAULT_MAX_BOXES: usize = 100;

/// One training batch.
#[derive(Debug)]
pub struct DetectionBatch {
    pub images: Tensor,
    pub gt_boxes: Tensor,
    pub grid_shapes: Tensor,
    pub targets: [Tensor; 2],
    /// Dataset index of each row, in row order.
    pub indices: Vec<usize>,
    /// Group the batch was built from.
    pub group_index: usize,
    /// Number of true boxes written for each row.
    pub box_counts: Vec<usize>,
}

impl DetectionBatch {
    /// Number of rows.
    pub fn batch_size(&self) -> i64 {
        self.images.size()[0]
    }

    /// Side length `S` of the square images.
    pub fn image_size(&self) -> i64 {
        self.images.size()[1]
    }

    /// Transfers all tensors to the target device (CPU/GPU).
    pub fn to_device(&self, device: Device) -> Self {
        Self {
            images: self.images.to_device(device),
            gt_boxes: self.gt_boxes.to_device(device),
            grid_shapes: self.grid_shapes.to_device(device),
            targets: [
                self.targets[0].to_device(device),
                self.targets[1].to_device(device),
            ],
            indices: self.indices.clone(),
            group_index: self.group_index,
            box_counts: self.box_counts.clone(),
        }
    }
}

/// Model inputs of one batch, before targets are attached.
#[derive(Debug)]
pub struct BatchInputs {
    pub images: Tensor,
    pub gt_boxes: Tensor,
    pub grid_shapes: Tensor,
    pub indices: Vec<usize>,
    pub box_counts: Vec<usize>,
}

/// Stacks letterboxed samples into a [`DetectionBatch`].
///
/// Samples removed by validation leave holes in a group. The assembler
/// fills the batch back up to `batch_size` rows by cycling over the
/// surviving samples, the same way the last group of an epoch wraps, so
/// the leading dimension never changes.
#[derive(Debug, Clone)]
pub struct BatchAssembler {
    batch_size: usize,
    max_boxes: usize,
}

impl BatchAssembler {
    pub fn new(batch_size: usize, max_boxes: usize) -> Result<Self> {
        ensure!(
            batch_size > 0,
            GeneratorError::config("batch_size must be a positive integer, but got 0")
        );
        ensure!(
            max_boxes > 0,
            GeneratorError::config("max_boxes must be a positive integer, but got 0")
        );
        Ok(Self {
            batch_size,
            max_boxes,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn max_boxes(&self) -> usize {
        self.max_boxes
    }

    /// Builds the batch for a validated group.
    ///
    /// Returns `Ok(None)` when every sample of the group was dropped; the
    /// caller is expected to move on to the next group.
    pub fn assemble(
        &self,
        group_index: usize,
        samples: &[PreparedSample],
    ) -> Result<Option<DetectionBatch>> {
        let Some(inputs) = self.compute_inputs(samples)? else {
            return Ok(None);
        };

        Ok(Some(DetectionBatch {
            images: inputs.images,
            gt_boxes: inputs.gt_boxes,
            grid_shapes: inputs.grid_shapes,
            targets: self.compute_targets(),
            indices: inputs.indices,
            group_index,
            box_counts: inputs.box_counts,
        }))
    }

    /// Allocates and fills `images`, `gt_boxes` and `grid_shapes`.
    pub fn compute_inputs(&self, samples: &[PreparedSample]) -> Result<Option<BatchInputs>> {
        let Some(first) = samples.first() else {
            return Ok(None);
        };
        let side = first.side();
        for s in samples {
            ensure!(
                s.image.dimensions() == (side, side),
                "Sample {} has image size {:?}, expected {}x{}",
                s.index,
                s.image.dimensions(),
                side,
                side
            );
        }

        let n = self.batch_size;
        let side_usize = side as usize;
        let plane = side_usize * side_usize * 3;
        let gray = LETTERBOX_FILL as f32 / 255.0;

        let mut pixels = vec![gray; n * plane];
        let mut boxes = vec![0.0f32; n * self.max_boxes * 5];
        let mut indices = Vec::with_capacity(n);
        let mut box_counts = Vec::with_capacity(n);

        for (row, sample) in samples.iter().cycle().take(n).enumerate() {
            let dst = &mut pixels[row * plane..(row + 1) * plane];
            for (d, &v) in dst.iter_mut().zip(sample.image.as_raw()) {
                *d = v as f32 / 255.0;
            }

            let count = sample.annotations.len();
            if count > self.max_boxes && row < samples.len() {
                warn!(
                    index = sample.index,
                    boxes = count,
                    max_boxes = self.max_boxes,
                    "Image has more boxes than max_boxes, truncating"
                );
            }
            let kept = count.min(self.max_boxes);
            let base = row * self.max_boxes * 5;
            for (k, (label, b)) in sample.annotations.iter().take(kept).enumerate() {
                let r = base + k * 5;
                boxes[r..r + 4].copy_from_slice(b);
                boxes[r + 4] = label as f32;
            }
            indices.push(sample.index);
            box_counts.push(kept);
        }

        let s = side as i64;
        let images = Tensor::from_slice(&pixels).reshape(&[n as i64, s, s, 3]);
        let gt_boxes = Tensor::from_slice(&boxes).reshape(&[n as i64, self.max_boxes as i64, 5]);
        let grid_shapes = Self::grid_shapes(side, n);

        Ok(Some(BatchInputs {
            images,
            gt_boxes,
            grid_shapes,
            indices,
            box_counts,
        }))
    }

    /// `[n, 3, 2]` Int tensor of feature-map sizes for a square input.
    pub fn grid_shapes(side: u32, n: usize) -> Tensor {
        let per_image: Vec<i32> = STRIDES
            .iter()
            .flat_map(|&stride| {
                let g = (side / stride) as i32;
                [g, g]
            })
            .collect();
        let tiled: Vec<i32> = per_image.repeat(n);
        Tensor::from_slice(&tiled).reshape(&[n as i64, 3, 2])
    }

    /// Placeholder targets: two zero vectors of length `batch_size`.
    pub fn compute_targets(&self) -> [Tensor; 2] {
        let n = self.batch_size as i64;
        [
            Tensor::zeros(&[n], (Kind::Float, Device::Cpu)),
            Tensor::zeros(&[n], (Kind::Float, Device::Cpu)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Annotations;
    use image::{Rgb, RgbImage};

    fn prepared(index: usize, side: u32, boxes: &[(f32, f32, f32, f32, usize)]) -> PreparedSample {
        PreparedSample {
            index,
            image: RgbImage::from_pixel(side, side, Rgb([255, 0, 51])),
            annotations: Annotations::from_boxes(boxes),
            scale: 1.0,
            offset: (0, 0),
        }
    }

    #[test]
    fn test_shapes_and_kinds() -> Result<()> {
        let assembler = BatchAssembler::new(2, 4)?;
        let samples = vec![
            prepared(3, 64, &[(1.0, 2.0, 30.0, 40.0, 1)]),
            prepared(5, 64, &[(0.0, 0.0, 20.0, 20.0, 0), (5.0, 5.0, 25.0, 25.0, 2)]),
        ];
        let batch = assembler.assemble(0, &samples)?.expect("non-empty group");

        assert_eq!(batch.images.size(), vec![2, 64, 64, 3]);
        assert_eq!(batch.images.kind(), Kind::Float);
        assert_eq!(batch.gt_boxes.size(), vec![2, 4, 5]);
        assert_eq!(batch.grid_shapes.size(), vec![2, 3, 2]);
        assert_eq!(batch.grid_shapes.kind(), Kind::Int);
        assert_eq!(batch.targets[0].size(), vec![2]);
        assert_eq!(batch.indices, vec![3, 5]);
        assert_eq!(batch.box_counts, vec![1, 2]);

        let moved = batch.to_device(Device::Cpu);
        assert_eq!(moved.images.device(), Device::Cpu);
        assert!(moved.gt_boxes.equal(&batch.gt_boxes));
        assert_eq!(moved.grid_shapes.size(), vec![2, 3, 2]);
        assert_eq!(moved.indices, batch.indices);
        assert_eq!(moved.group_index, 0);
        Ok(())
    }

    #[test]
    fn test_pixels_are_normalized() -> Result<()> {
        let assembler = BatchAssembler::new(1, 1)?;
        let batch = assembler
            .assemble(0, &[prepared(0, 32, &[(0.0, 0.0, 10.0, 10.0, 0)])])?
            .expect("non-empty group");

        assert!((batch.images.double_value(&[0, 0, 0, 0]) - 1.0).abs() < 1e-6);
        assert!(batch.images.double_value(&[0, 5, 5, 1]).abs() < 1e-6);
        assert!((batch.images.double_value(&[0, 31, 31, 2]) - 0.2).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_padding_rows_are_zero() -> Result<()> {
        let assembler = BatchAssembler::new(1, 5)?;
        let batch = assembler
            .assemble(0, &[prepared(0, 32, &[(1.0, 2.0, 13.0, 14.0, 3), (2.0, 2.0, 20.0, 20.0, 1)])])?
            .expect("non-empty group");

        assert_eq!(batch.gt_boxes.double_value(&[0, 0, 0]), 1.0);
        assert_eq!(batch.gt_boxes.double_value(&[0, 0, 4]), 3.0);
        assert_eq!(batch.gt_boxes.double_value(&[0, 1, 4]), 1.0);
        let padding = batch.gt_boxes.narrow(1, 2, 3);
        assert_eq!(padding.abs().sum(Kind::Float).double_value(&[]), 0.0);
        Ok(())
    }

    #[test]
    fn test_box_overflow_is_truncated() -> Result<()> {
        let assembler = BatchAssembler::new(1, 2)?;
        let boxes: Vec<_> = (0..5).map(|i| (i as f32, 0.0, 20.0, 20.0, i)).collect();
        let batch = assembler
            .assemble(0, &[prepared(0, 32, &boxes)])?
            .expect("non-empty group");

        assert_eq!(batch.gt_boxes.size(), vec![1, 2, 5]);
        assert_eq!(batch.box_counts, vec![2]);
        assert_eq!(batch.gt_boxes.double_value(&[0, 1, 4]), 1.0);
        Ok(())
    }

    #[test]
    fn test_dropped_samples_are_refilled_from_survivors() -> Result<()> {
        let assembler = BatchAssembler::new(4, 2)?;
        let samples = vec![
            prepared(7, 32, &[(0.0, 0.0, 10.0, 10.0, 0)]),
            prepared(9, 32, &[(0.0, 0.0, 10.0, 10.0, 0)]),
        ];
        let batch = assembler.assemble(2, &samples)?.expect("non-empty group");

        assert_eq!(batch.batch_size(), 4);
        assert_eq!(batch.indices, vec![7, 9, 7, 9]);
        assert_eq!(batch.group_index, 2);
        Ok(())
    }

    #[test]
    fn test_empty_group_yields_sentinel() -> Result<()> {
        let assembler = BatchAssembler::new(3, 2)?;
        assert!(assembler.assemble(0, &[])?.is_none());
        Ok(())
    }

    #[test]
    fn test_grid_shapes_follow_strides() {
        let grid = BatchAssembler::grid_shapes(416, 2);
        assert_eq!(grid.int64_value(&[1, 0, 0]), 13);
        assert_eq!(grid.int64_value(&[1, 1, 1]), 26);
        assert_eq!(grid.int64_value(&[0, 2, 0]), 52);
    }

    #[test]
    fn test_mixed_sizes_are_rejected() -> Result<()> {
        let assembler = BatchAssembler::new(2, 2)?;
        let samples = vec![prepared(0, 32, &[]), prepared(1, 64, &[])];
        assert!(assembler.assemble(0, &samples).is_err());
        Ok(())
    }
}
